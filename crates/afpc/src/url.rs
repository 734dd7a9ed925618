//! `afp://` URL parsing.
//!
//! Accepted shape: `[afp://][user[:password]@]server[:port]/volume`. The
//! scheme is optional, the volume may be absent for server-level commands,
//! and a password of `-` means "prompt".

use rafp::{Error, AFP_PORT};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AfpUrl {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub volume: String,
}

fn bad(url: &str, why: &str) -> Error {
    Error::Resolve(format!("{}: {}", url, why))
}

pub fn parse_afp_url(url: &str) -> rafp::Result<AfpUrl> {
    let rest = url.strip_prefix("afp://").unwrap_or(url);

    let (authority, volume) = match rest.split_once('/') {
        Some((authority, volume)) => (authority, volume.trim_end_matches('/')),
        None => (rest, ""),
    };
    if volume.contains('/') {
        return Err(bad(url, "volume name must not contain '/'"));
    }

    let (credentials, hostport) = match authority.rsplit_once('@') {
        Some((credentials, hostport)) => (Some(credentials), hostport),
        None => (None, authority),
    };

    let (username, password) = match credentials {
        Some(credentials) => match credentials.split_once(':') {
            Some((user, password)) => (user.to_string(), password.to_string()),
            None => (credentials.to_string(), String::new()),
        },
        None => (String::new(), String::new()),
    };

    let (hostname, port) = match hostport.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| bad(url, "invalid port"))?;
            (host, port)
        }
        None => (hostport, AFP_PORT),
    };
    if hostname.is_empty() {
        return Err(bad(url, "missing server name"));
    }

    Ok(AfpUrl {
        hostname: hostname.to_string(),
        port,
        username,
        password,
        volume: volume.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_url() {
        let url = parse_afp_url("afp://amanda:pw@files.local:10548/Media").unwrap();
        assert_eq!(
            url,
            AfpUrl {
                hostname: "files.local".into(),
                port: 10548,
                username: "amanda".into(),
                password: "pw".into(),
                volume: "Media".into(),
            }
        );
    }

    #[test]
    fn bare_host_defaults() {
        let url = parse_afp_url("files.local").unwrap();
        assert_eq!(url.hostname, "files.local");
        assert_eq!(url.port, AFP_PORT);
        assert!(url.username.is_empty());
        assert!(url.volume.is_empty());
    }

    #[test]
    fn user_without_password() {
        let url = parse_afp_url("afp://amanda@files.local/Media").unwrap();
        assert_eq!(url.username, "amanda");
        assert!(url.password.is_empty());
    }

    #[test]
    fn password_may_contain_at_sign() {
        let url = parse_afp_url("afp://amanda:p@ss@files.local/Media").unwrap();
        assert_eq!(url.password, "p@ss");
        assert_eq!(url.hostname, "files.local");
    }

    #[test]
    fn rejects_bad_port_and_nested_volume() {
        assert!(parse_afp_url("afp://files.local:notaport/Media").is_err());
        assert!(parse_afp_url("afp://files.local/Media/sub").is_err());
        assert!(parse_afp_url("afp:///Media").is_err());
    }
}
