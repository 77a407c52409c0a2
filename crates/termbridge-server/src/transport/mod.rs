//! Transport endpoint: HTTP listener, upgrade policy, frame adapters.

pub mod websocket;

/// Which `Origin` headers may open a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Accept every origin, including requests without the header.
    #[default]
    Any,
    /// Accept only exact matches; requests without `Origin` are rejected.
    AllowList(Vec<String>),
}

impl OriginPolicy {
    /// An empty list means permissive.
    pub fn from_list(origins: Vec<String>) -> Self {
        if origins.is_empty() {
            OriginPolicy::Any
        } else {
            OriginPolicy::AllowList(origins)
        }
    }

    pub fn allows(&self, origin: Option<&str>) -> bool {
        match self {
            OriginPolicy::Any => true,
            OriginPolicy::AllowList(list) => {
                origin.is_some_and(|o| list.iter().any(|allowed| allowed == o))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_allows_everything() {
        let policy = OriginPolicy::from_list(Vec::new());
        assert_eq!(policy, OriginPolicy::Any);
        assert!(policy.allows(None));
        assert!(policy.allows(Some("https://evil.example")));
    }

    #[test]
    fn allow_list_is_exact() {
        let policy = OriginPolicy::from_list(vec!["https://term.example".into()]);
        assert!(policy.allows(Some("https://term.example")));
        assert!(!policy.allows(Some("https://term.example.evil")));
        assert!(!policy.allows(None));
    }
}
