//! Pool names and addresses

use std::fmt;

use crate::error::{PoolError, Result};

pub const MAX_POOL_NAME_LEN: usize = 100;

const LEGAL_POOL_CHARS: &str = " !#$%&'()+,-./0123456789;=@ABCDEFGHIJKLMNOPQ\
                                RSTUVWXYZ[]^_`abcdefghijklmnopqrstuvwxyz{}~";

/// Where a pool lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolAddress {
    /// Hierarchical name under the pools directory
    Local(String),
    /// `scheme://host[:port]/name`
    Remote {
        scheme: String,
        host: String,
        port: Option<u16>,
        name: String,
    },
}

impl PoolAddress {
    /// Parse and validate a pool name
    pub fn parse(name: &str) -> Result<Self> {
        match name.split_once("://") {
            Some((scheme, rest)) => parse_remote(name, scheme, rest),
            None => {
                validate_name(name)?;
                Ok(PoolAddress::Local(name.to_string()))
            }
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, PoolAddress::Local(_))
    }

    /// The pool name without any transport prefix
    pub fn name(&self) -> &str {
        match self {
            PoolAddress::Local(name) => name,
            PoolAddress::Remote { name, .. } => name,
        }
    }
}

impl fmt::Display for PoolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolAddress::Local(name) => f.write_str(name),
            PoolAddress::Remote { scheme, host, port: Some(port), name } => {
                write!(f, "{}://{}:{}/{}", scheme, host, port, name)
            }
            PoolAddress::Remote { scheme, host, port: None, name } => {
                write!(f, "{}://{}/{}", scheme, host, name)
            }
        }
    }
}

fn parse_remote(full: &str, scheme: &str, rest: &str) -> Result<PoolAddress> {
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-') {
        return Err(PoolError::bad_name(full, "malformed scheme"));
    }
    let (authority, name) = rest
        .split_once('/')
        .ok_or_else(|| PoolError::bad_name(full, "remote name needs a pool after the host"))?;
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| PoolError::bad_name(full, format!("bad port {:?}", port)))?;
            (host, Some(port))
        }
        None => (authority, None),
    };
    if host.is_empty() {
        return Err(PoolError::bad_name(full, "empty host"));
    }
    validate_name(name)?;
    Ok(PoolAddress::Remote {
        scheme: scheme.to_string(),
        host: host.to_string(),
        port,
        name: name.to_string(),
    })
}

/// Check a local pool name against the portable naming rules
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_POOL_NAME_LEN {
        return Err(PoolError::bad_name(
            name,
            format!("length must be 1..={}", MAX_POOL_NAME_LEN),
        ));
    }
    if let Some(c) = name.chars().find(|c| !LEGAL_POOL_CHARS.contains(*c)) {
        return Err(PoolError::bad_name(name, format!("illegal character {:?}", c)));
    }
    for component in name.split('/') {
        validate_component(name, component)?;
    }
    Ok(())
}

fn validate_component(name: &str, s: &str) -> Result<()> {
    if s.is_empty() || s.starts_with('.') {
        return Err(PoolError::bad_name(name, "empty or hidden path component"));
    }
    if s.ends_with([' ', '.', '$']) {
        return Err(PoolError::bad_name(name, format!("component {:?} has a bad last character", s)));
    }
    if is_reserved(s) {
        return Err(PoolError::bad_name(name, format!("{:?} is a reserved name", s)));
    }
    Ok(())
}

/// Device names, alone or followed by an extension
fn is_reserved(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    let stem = lower.split('.').next().unwrap_or("");
    match stem {
        "con" | "prn" | "aux" | "nul" | "lost+found" => true,
        _ => {
            let b = stem.as_bytes();
            b.len() == 4
                && (stem.starts_with("com") || stem.starts_with("lpt"))
                && (b'1'..=b'9').contains(&b[3])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["pool", "a/b/c", "with space", "x$y", "weird!#%&'()+,-;=@[]^_`{}~", "console"] {
            assert!(validate_name(name).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_invalid_names() {
        let too_long = "x".repeat(MAX_POOL_NAME_LEN + 1);
        for name in [
            "", &too_long, "star*", "a//b", ".hidden", "a/.b", "trailing.", "trailing ",
            "conin$", "CON", "nul.txt", "com1", "LPT9.log", "lost+found", "colon:",
        ] {
            let err = validate_name(name).unwrap_err();
            assert!(matches!(err, PoolError::BadName { .. }), "{}", name);
        }
        assert!(validate_name("com0").is_ok());
        assert!(validate_name("com10").is_ok());
    }

    #[test]
    fn test_addresses() {
        assert_eq!(PoolAddress::parse("a/b").unwrap(), PoolAddress::Local("a/b".into()));

        let remote = PoolAddress::parse("tcp://example.com:65456/stuff").unwrap();
        assert_eq!(
            remote,
            PoolAddress::Remote {
                scheme: "tcp".into(),
                host: "example.com".into(),
                port: Some(65456),
                name: "stuff".into()
            }
        );
        assert_eq!(remote.to_string(), "tcp://example.com:65456/stuff");
        assert!(!remote.is_local());
        assert_eq!(remote.name(), "stuff");

        assert!(PoolAddress::parse("tcp://host/").is_err());
        assert!(PoolAddress::parse("tcp://host:port/p").is_err());
        assert!(PoolAddress::parse("tcp://host").is_err());
    }
}
