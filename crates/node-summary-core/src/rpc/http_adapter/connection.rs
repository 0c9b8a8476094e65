use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::error::CoreError;

/// Where basic-auth credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Credentials {
    None,
    UserPass { user: String, pass: String },
    /// Re-read on every call: the node rewrites the cookie when it restarts.
    CookieFile(PathBuf),
}

impl Credentials {
    pub(super) fn resolve(&self) -> Result<Option<(String, String)>, CoreError> {
        match self {
            Self::None => Ok(None),
            Self::UserPass { user, pass } => Ok(Some((user.clone(), pass.clone()))),
            Self::CookieFile(path) => read_cookie_file(path).map(Some),
        }
    }
}

/// Pick the credential source.
///
/// Precedence: cookie file, then explicit `user` + `pass`, then no auth.
/// Empty strings count as unset.
pub(super) fn resolve_credentials(
    user: Option<&str>,
    pass: Option<&str>,
    cookie_file: Option<&Path>,
) -> Result<Credentials, CoreError> {
    if let Some(path) = cookie_file.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(Credentials::CookieFile(path.to_path_buf()));
    }

    let user = user.filter(|u| !u.is_empty());
    let pass = pass.filter(|p| !p.is_empty());
    match (user, pass) {
        (Some(u), Some(p)) => Ok(Credentials::UserPass {
            user: u.to_owned(),
            pass: p.to_owned(),
        }),
        (Some(_), None) | (None, Some(_)) => Err(CoreError::InvalidConfig(
            "both rpc user and rpc pass must be set together".to_owned(),
        )),
        (None, None) => Ok(Credentials::None),
    }
}

fn read_cookie_file(cookie_file: &Path) -> Result<(String, String), CoreError> {
    let content = std::fs::read_to_string(cookie_file).map_err(|e| {
        CoreError::Credential(format!(
            "failed to read rpc cookie file {}: {e}",
            cookie_file.display()
        ))
    })?;
    let line = content.trim();
    if line.is_empty() {
        return Err(CoreError::Credential(format!(
            "rpc cookie file {} is empty",
            cookie_file.display()
        )));
    }

    let (cookie_user, cookie_pass) = line.split_once(':').ok_or_else(|| {
        CoreError::Credential(format!(
            "rpc cookie file {} must contain `username:password`",
            cookie_file.display()
        ))
    })?;
    if cookie_user.is_empty() || cookie_pass.is_empty() {
        return Err(CoreError::Credential(format!(
            "rpc cookie file {} must contain non-empty `username:password`",
            cookie_file.display()
        )));
    }

    Ok((cookie_user.to_owned(), cookie_pass.to_owned()))
}

/// Build the endpoint URL from a host (scheme optional, `http` implied) and a
/// port.
pub(super) fn endpoint_url(host: &str, port: u16) -> Result<String, CoreError> {
    let with_scheme = if host.contains("://") {
        host.to_owned()
    } else {
        format!("http://{host}")
    };
    let mut parsed = Url::parse(&with_scheme).map_err(|e| {
        CoreError::InvalidConfig(format!(
            "invalid rpc host `{host}`: expected host name or HTTP(S) URL ({e})"
        ))
    })?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(CoreError::InvalidConfig(format!(
                "unsupported rpc host scheme `{other}`; expected http or https"
            )))
        }
    }
    parsed.set_port(Some(port)).map_err(|()| {
        CoreError::InvalidConfig(format!("rpc host `{host}` cannot carry a port"))
    })?;
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn temp_cookie(tag: &str, content: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time must be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("node-summary-cookie-{tag}-{unique}.txt"));
        fs::write(&path, content).expect("cookie file must be writable");
        path
    }

    #[test]
    fn endpoint_url_implies_http() {
        let url = endpoint_url("127.0.0.1", 8332).expect("should parse");
        assert_eq!(url, "http://127.0.0.1:8332/");
    }

    #[test]
    fn endpoint_url_keeps_explicit_scheme() {
        let url = endpoint_url("https://node.example", 443).expect("should parse");
        assert_eq!(url, "https://node.example/");
        let url = endpoint_url("http://node.example", 18443).expect("should parse");
        assert_eq!(url, "http://node.example:18443/");
    }

    #[test]
    fn endpoint_url_rejects_other_schemes() {
        let err = endpoint_url("ftp://example.com", 21).expect_err("must reject ftp");
        assert!(err.to_string().contains("unsupported rpc host scheme"));
    }

    #[test]
    fn partial_credentials_are_rejected() {
        let err = resolve_credentials(Some("user"), None, None).expect_err("must reject");
        assert!(err.to_string().contains("must be set together"));
    }

    #[test]
    fn empty_values_count_as_unset() {
        let creds = resolve_credentials(Some(""), Some(""), Some(Path::new("")))
            .expect("empty settings mean no auth");
        assert_eq!(creds, Credentials::None);
    }

    #[test]
    fn cookie_file_takes_precedence() {
        let creds = resolve_credentials(Some("alice"), Some("secret"), Some(Path::new("/c")))
            .expect("cookie path must be accepted");
        assert_eq!(creds, Credentials::CookieFile(PathBuf::from("/c")));
    }

    #[test]
    fn cookie_file_is_trimmed_and_split_once() {
        let path = temp_cookie("split", "__cookie__:to:ken\n");
        let auth = Credentials::CookieFile(path.clone())
            .resolve()
            .expect("cookie must parse");
        assert_eq!(auth, Some(("__cookie__".to_owned(), "to:ken".to_owned())));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn unreadable_cookie_is_a_credential_error() {
        let err = Credentials::CookieFile(PathBuf::from("/nonexistent/node-summary/.cookie"))
            .resolve()
            .expect_err("missing cookie must fail");
        assert!(matches!(err, CoreError::Credential(_)));
    }

    #[test]
    fn malformed_cookie_is_a_credential_error() {
        let path = temp_cookie("malformed", "no-separator");
        let err = Credentials::CookieFile(path.clone())
            .resolve()
            .expect_err("cookie without colon must fail");
        assert!(matches!(err, CoreError::Credential(_)));
        let _ = fs::remove_file(path);
    }
}
