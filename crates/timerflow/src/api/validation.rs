// crates/timerflow/src/api/validation.rs
//
// Field checks for `POST /timer/`. All failures are collected so a client sees
// every bad field in one 422.

use serde_json::{Map, Value};
use url::Url;

use crate::api::models::FieldError;
use crate::service::TimerRequest;

const DURATION_FIELDS: [&str; 3] = ["hours", "minutes", "seconds"];

pub fn parse_timer_request(body: &[u8]) -> Result<TimerRequest, Vec<FieldError>> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        vec![FieldError::new(
            &["body"],
            format!("JSON decode error: {e}"),
            "json_invalid",
        )]
    })?;

    let Value::Object(fields) = value else {
        return Err(vec![FieldError::new(
            &[],
            "Input should be a valid dictionary",
            "dict_type",
        )]);
    };

    let mut errors = Vec::new();
    let mut durations = [0u64; 3];
    for (slot, name) in durations.iter_mut().zip(DURATION_FIELDS) {
        match non_negative_int(&fields, name) {
            Ok(v) => *slot = v,
            Err(e) => errors.push(e),
        }
    }

    let url = match http_url(&fields) {
        Ok(url) => Some(url),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    match url {
        Some(url) if errors.is_empty() => {
            let [hours, minutes, seconds] = durations;
            Ok(TimerRequest {
                hours,
                minutes,
                seconds,
                url,
            })
        }
        _ => Err(errors),
    }
}

/// Missing or null counts as 0. Integral floats and digit strings are
/// accepted as integers.
fn non_negative_int(fields: &Map<String, Value>, name: &str) -> Result<u64, FieldError> {
    let not_int = || FieldError::new(&[name], "Input should be a valid integer", "int_type");
    let negative = || {
        FieldError::new(
            &[name],
            "Input should be greater than or equal to 0",
            "greater_than_equal",
        )
    };

    match fields.get(name) {
        None | Some(Value::Null) => Ok(0),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_u64() {
                Ok(v)
            } else if n.as_i64().is_some() {
                Err(negative())
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() != 0.0 => Err(FieldError::new(
                        &[name],
                        "Input should be a valid integer, got a number with a fractional part",
                        "int_from_float",
                    )),
                    Some(f) if f < 0.0 => Err(negative()),
                    Some(f) if f <= u64::MAX as f64 => Ok(f as u64),
                    _ => Err(not_int()),
                }
            }
        }
        Some(Value::String(s)) => match s.trim().parse::<i128>() {
            Ok(v) if v < 0 => Err(negative()),
            Ok(v) => u64::try_from(v).map_err(|_| not_int()),
            Err(_) => Err(FieldError::new(
                &[name],
                "Input should be a valid integer, unable to parse string as an integer",
                "int_parsing",
            )),
        },
        Some(_) => Err(not_int()),
    }
}

fn http_url(fields: &Map<String, Value>) -> Result<Url, FieldError> {
    let raw = match fields.get("url") {
        None => return Err(FieldError::new(&["url"], "Field required", "missing")),
        Some(Value::String(s)) => s,
        Some(_) => {
            return Err(FieldError::new(
                &["url"],
                "URL input should be a string or URL",
                "url_type",
            ))
        }
    };

    let url = Url::parse(raw.trim()).map_err(|e| {
        FieldError::new(
            &["url"],
            format!("Input should be a valid URL, {e}"),
            "url_parsing",
        )
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(FieldError::new(
            &["url"],
            "URL scheme should be 'http' or 'https'",
            "url_scheme",
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(FieldError::new(
            &["url"],
            "Input should be a valid URL, empty host",
            "url_parsing",
        ));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<TimerRequest, Vec<FieldError>> {
        parse_timer_request(body.as_bytes())
    }

    fn kinds(errs: &[FieldError]) -> Vec<(String, String)> {
        errs.iter()
            .map(|e| (e.loc.join("."), e.kind.clone()))
            .collect()
    }

    #[test]
    fn accepts_full_request() {
        let req = parse(r#"{"hours":1,"minutes":30,"seconds":15,"url":"https://example.com/cb"}"#)
            .unwrap();
        assert_eq!((req.hours, req.minutes, req.seconds), (1, 30, 15));
        assert_eq!(req.url.as_str(), "https://example.com/cb");
    }

    #[test]
    fn missing_and_null_durations_default_to_zero() {
        let req = parse(r#"{"minutes":null,"url":"http://localhost:9000/x"}"#).unwrap();
        assert_eq!((req.hours, req.minutes, req.seconds), (0, 0, 0));
    }

    #[test]
    fn lax_integers_are_accepted() {
        let req = parse(r#"{"hours":"2","seconds":5.0,"url":"http://h/x"}"#).unwrap();
        assert_eq!((req.hours, req.seconds), (2, 5));
    }

    #[test]
    fn collects_every_bad_field() {
        let errs =
            parse(r#"{"hours":-1,"minutes":"abc","seconds":1.5,"url":"ftp://h/x"}"#).unwrap_err();
        assert_eq!(
            kinds(&errs),
            vec![
                ("hours".to_string(), "greater_than_equal".to_string()),
                ("minutes".to_string(), "int_parsing".to_string()),
                ("seconds".to_string(), "int_from_float".to_string()),
                ("url".to_string(), "url_scheme".to_string()),
            ]
        );
    }

    #[test]
    fn url_is_required_and_must_parse() {
        let errs = parse(r#"{"seconds":1}"#).unwrap_err();
        assert_eq!(kinds(&errs), vec![("url".into(), "missing".into())]);

        let errs = parse(r#"{"url":"not a url"}"#).unwrap_err();
        assert_eq!(kinds(&errs), vec![("url".into(), "url_parsing".into())]);

        let errs = parse(r#"{"url":42}"#).unwrap_err();
        assert_eq!(kinds(&errs), vec![("url".into(), "url_type".into())]);
    }

    #[test]
    fn rejects_non_object_and_broken_json() {
        let errs = parse("[1,2]").unwrap_err();
        assert_eq!(errs[0].kind, "dict_type");

        let errs = parse("{\"url\":").unwrap_err();
        assert_eq!(errs[0].kind, "json_invalid");
        assert_eq!(errs[0].loc, vec!["body".to_string()]);
    }

    #[test]
    fn booleans_are_not_integers() {
        let errs = parse(r#"{"hours":true,"url":"http://h/x"}"#).unwrap_err();
        assert_eq!(kinds(&errs), vec![("hours".into(), "int_type".into())]);
    }
}
