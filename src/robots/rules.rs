//! Robots.txt rule matching
//!
//! A thin wrapper around the robotstxt crate's matcher, keeping the raw
//! content so matching can run on demand per user agent.

use robotstxt::DefaultMatcher;

/// Parsed robots.txt rules for one host
#[derive(Debug, Clone)]
pub struct RobotsRules {
    content: String,
}

impl RobotsRules {
    /// Wraps raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
        }
    }

    /// Checks whether a URL is allowed for the given user agent
    ///
    /// Matching is permissive: `Allow` beats `Disallow` on equal
    /// specificity and unknown directives are ignored, which is what
    /// the underlying matcher implements.
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.content.is_empty() {
            return true;
        }
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Crawl-delay for the given user agent, in seconds
    ///
    /// The robotstxt crate does not expose Crawl-delay, so the groups
    /// are walked by hand: the most specific matching group wins, `*`
    /// is the fallback.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let agent_lower = user_agent.to_ascii_lowercase();
        let mut current_agents: Vec<String> = Vec::new();
        let mut in_group_body = false;
        let mut specific_delay: Option<f64> = None;
        let mut wildcard_delay: Option<f64> = None;

        for line in self.content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = match line.split_once(':') {
                Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim()),
                None => continue,
            };

            match key.as_str() {
                "user-agent" => {
                    if in_group_body {
                        current_agents.clear();
                        in_group_body = false;
                    }
                    current_agents.push(value.to_ascii_lowercase());
                }
                "crawl-delay" => {
                    in_group_body = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        for agent in &current_agents {
                            if agent == "*" {
                                wildcard_delay.get_or_insert(delay);
                            } else if agent_lower.contains(agent.as_str()) {
                                specific_delay.get_or_insert(delay);
                            }
                        }
                    }
                }
                _ => in_group_body = true,
            }
        }

        specific_delay.or(wildcard_delay)
    }
}
