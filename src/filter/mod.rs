//! User-agent screening for automated clients.
//!
//! Matching is a plain case-insensitive substring test against a fixed
//! deny-list. There is no state and nothing here can fail.

/// Tokens that mark a user-agent as non-human. Lowercase.
const DENIED_AGENTS: &[&str] = &[
    // HTTP client libraries
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "httpx",
    "go-http-client",
    "java/",
    "okhttp",
    "axios",
    "node-fetch",
    "libwww-perl",
    "scrapy",
    "postman",
    // Headless browsers and automation
    "headlesschrome",
    "phantomjs",
    "selenium",
    "puppeteer",
    "playwright",
    "webdriver",
    // Generic crawler tokens
    "bot",
    "crawler",
    "spider",
    "scraper",
];

/// Returns `true` when the request should be refused before any other work.
/// A missing or blank user-agent is treated as automated.
pub fn is_blocked(user_agent: Option<&str>) -> bool {
    let Some(agent) = user_agent.map(str::trim).filter(|a| !a.is_empty()) else {
        return true;
    };
    let lower = agent.to_lowercase();
    DENIED_AGENTS.iter().any(|token| lower.contains(token))
}
