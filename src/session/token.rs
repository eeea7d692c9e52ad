use crate::model::Lsn;
use std::fmt;
use std::str::FromStr;

/// Partition-local session token, written as `<version>#<global lsn>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionToken {
    version: i64,
    global_lsn: Lsn,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionTokenParseError {
    #[error("session token must look like `<version>#<lsn>`, got `{0}`")]
    Malformed(String),
    #[error("session token `{0}` has a non-numeric component")]
    NotNumeric(String),
}

impl SessionToken {
    pub fn new(version: i64, global_lsn: Lsn) -> Self {
        SessionToken { version, global_lsn }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn global_lsn(&self) -> Lsn {
        self.global_lsn
    }

    /// True when a replica that returned `other` has caught up with everything this session saw.
    pub fn is_satisfied_by(&self, other: &SessionToken) -> bool {
        other.global_lsn >= self.global_lsn
    }

    /// Keeps the furthest progress of the two tokens.
    pub fn merge(&self, other: &SessionToken) -> SessionToken {
        SessionToken {
            version: self.version.max(other.version),
            global_lsn: self.global_lsn.max(other.global_lsn),
        }
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.version, self.global_lsn)
    }
}

impl FromStr for SessionToken {
    type Err = SessionTokenParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '#');
        let (version, lsn) = match (parts.next(), parts.next()) {
            (Some(version), Some(lsn)) => (version, lsn),
            _ => return Err(SessionTokenParseError::Malformed(s.to_string())),
        };

        let version = version
            .parse::<i64>()
            .map_err(|_| SessionTokenParseError::NotNumeric(s.to_string()))?;
        let lsn = lsn
            .parse::<i64>()
            .map_err(|_| SessionTokenParseError::NotNumeric(s.to_string()))?;

        Ok(SessionToken::new(version, Lsn::new(lsn)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let token: SessionToken = "3#120".parse().unwrap();
        assert_eq!(token.version(), 3);
        assert_eq!(token.global_lsn(), Lsn::new(120));
        assert_eq!(token.to_string(), "3#120");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            "120".parse::<SessionToken>(),
            Err(SessionTokenParseError::Malformed(_))
        ));
        assert!(matches!(
            "a#120".parse::<SessionToken>(),
            Err(SessionTokenParseError::NotNumeric(_))
        ));
    }

    #[test]
    fn satisfied_only_by_equal_or_newer_lsn() {
        let requested = SessionToken::new(1, Lsn::new(10));

        assert!(requested.is_satisfied_by(&SessionToken::new(1, Lsn::new(10))));
        assert!(requested.is_satisfied_by(&SessionToken::new(1, Lsn::new(11))));
        assert!(!requested.is_satisfied_by(&SessionToken::new(2, Lsn::new(9))));
    }
}
