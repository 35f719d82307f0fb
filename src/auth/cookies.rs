use axum::http::{header, HeaderMap, HeaderValue};

use super::{ActorKind, TokenPair};

/// Reads a single cookie value from the request headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

fn build_cookie(name: &str, value: &str, max_age: i64, secure: bool) -> Option<HeaderValue> {
    let mut cookie = format!(
        "{}={}; HttpOnly; Path=/; Max-Age={}; SameSite=Lax",
        name, value, max_age
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).ok()
}

/// `Set-Cookie` headers carrying both tokens of a freshly issued pair.
pub fn session_cookies(kind: ActorKind, tokens: &TokenPair, secure: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let pairs = [
        (
            kind.access_cookie(),
            tokens.access_token.as_str(),
            tokens.expires_in,
        ),
        (
            kind.refresh_cookie(),
            tokens.refresh_token.as_str(),
            tokens.refresh_expires_in,
        ),
    ];
    for (name, value, max_age) in pairs {
        if let Some(cookie) = build_cookie(name, value, max_age, secure) {
            headers.append(header::SET_COOKIE, cookie);
        }
    }
    headers
}

/// `Set-Cookie` headers that expire both session cookies.
pub fn clear_session_cookies(kind: ActorKind, secure: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for name in [kind.access_cookie(), kind.refresh_cookie()] {
        if let Some(cookie) = build_cookie(name, "", 0, secure) {
            headers.append(header::SET_COOKIE, cookie);
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_named_cookie_among_many() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; adminAccessToken=abc.def; accessToken=xyz"),
        );
        assert_eq!(read_cookie(&headers, "accessToken").as_deref(), Some("xyz"));
        assert_eq!(
            read_cookie(&headers, "adminAccessToken").as_deref(),
            Some("abc.def")
        );
        assert_eq!(read_cookie(&headers, "refreshToken"), None);
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let headers = clear_session_cookies(ActorKind::Deliveryman, true);
        let values: Vec<_> = headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].starts_with("deliverymanAccessToken=;"));
        assert!(values.iter().all(|v| v.contains("Max-Age=0") && v.contains("Secure")));
    }
}
