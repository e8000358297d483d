use std::fmt;

use serde::{Deserialize, Serialize};

use tapline_net::Header;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientSource {
    Curl,
    Wget,
    Httpie,
    Postman,
    Insomnia,
    Node,
    Python,
    Go,
    Java,
    Browser,
    Terminal,
}

// First match wins.
const USER_AGENT_RULES: &[(&str, ClientSource)] = &[
    ("curl", ClientSource::Curl),
    ("wget", ClientSource::Wget),
    ("httpie", ClientSource::Httpie),
    ("postman", ClientSource::Postman),
    ("insomnia", ClientSource::Insomnia),
    ("node", ClientSource::Node),
    ("python", ClientSource::Python),
    ("go-http-client", ClientSource::Go),
    ("java", ClientSource::Java),
    ("chrome", ClientSource::Browser),
    ("chromium", ClientSource::Browser),
    ("firefox", ClientSource::Browser),
    ("safari", ClientSource::Browser),
    ("edge", ClientSource::Browser),
];

impl ClientSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientSource::Curl => "curl",
            ClientSource::Wget => "wget",
            ClientSource::Httpie => "httpie",
            ClientSource::Postman => "postman",
            ClientSource::Insomnia => "insomnia",
            ClientSource::Node => "node",
            ClientSource::Python => "python",
            ClientSource::Go => "go",
            ClientSource::Java => "java",
            ClientSource::Browser => "browser",
            ClientSource::Terminal => "terminal",
        }
    }

    pub fn from_user_agent(user_agent: &str) -> Self {
        let user_agent = user_agent.to_ascii_lowercase();
        USER_AGENT_RULES
            .iter()
            .find(|(needle, _)| user_agent.contains(needle))
            .map(|(_, source)| *source)
            .unwrap_or(ClientSource::Terminal)
    }
}

impl fmt::Display for ClientSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Labels the tool that sent a request from its User-Agent header.
pub fn detect_source(headers: &[Header]) -> ClientSource {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case("user-agent"))
        .map(|header| ClientSource::from_user_agent(&header.value))
        .unwrap_or(ClientSource::Terminal)
}
