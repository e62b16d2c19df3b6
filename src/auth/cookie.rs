use axum::http::{header::COOKIE, HeaderMap};

/// Value of the first cookie called `name`, across all `Cookie` headers in
/// the order the transport presented them.
pub fn find(headers: &HeaderMap, name: &str) -> Option<String> {
    pairs(headers)
        .find(|(cookie_name, _)| *cookie_name == name)
        .map(|(_, value)| value.to_string())
}

/// Number of cookie pairs on the request
pub fn count(headers: &HeaderMap) -> usize {
    pairs(headers).count()
}

fn pairs(headers: &HeaderMap) -> impl Iterator<Item = (&str, &str)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(parse_pair)
}

fn parse_pair(raw: &str) -> Option<(&str, &str)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (name, value) = raw.split_once('=').unwrap_or((raw, ""));
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    Some((name, strip_quotes(value.trim())))
}

fn strip_quotes(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(values: &[&'static str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(COOKIE, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_first_match_wins() {
        let headers = headers(&["haatc=first; haatc=second"]);
        assert_eq!(find(&headers, "haatc"), Some("first".to_string()));
    }

    #[test]
    fn test_first_match_across_headers() {
        let headers = headers(&["theme=dark", "haatc=one", "haatc=two"]);
        assert_eq!(find(&headers, "haatc"), Some("one".to_string()));
        assert_eq!(count(&headers), 3);
    }

    #[test]
    fn test_quoted_value() {
        let headers = headers(&["haatc=\"quoted\""]);
        assert_eq!(find(&headers, "haatc"), Some("quoted".to_string()));
    }

    #[test]
    fn test_name_must_match_exactly() {
        let headers = headers(&["haatc_old=x; HAATC=y"]);
        assert_eq!(find(&headers, "haatc"), None);
    }

    #[test]
    fn test_valueless_cookie_shadows_later_ones() {
        let headers = headers(&["haatc; haatc=late"]);
        assert_eq!(find(&headers, "haatc"), Some(String::new()));
    }

    #[test]
    fn test_whitespace_and_empty_segments() {
        let headers = headers(&[" ;  a=1 ;; haatc = tok ; "]);
        assert_eq!(find(&headers, "haatc"), Some("tok".to_string()));
        assert_eq!(count(&headers), 2);
    }
}
