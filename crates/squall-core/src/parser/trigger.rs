//! Parser triggers
//!
//! A trigger receives one completed token together with the state that
//! produced it, mutates the request and returns the next state. The
//! tokenizer in `mod.rs` never looks at token contents; everything a token
//! means lives here.

use super::{Method, ParserState};
use crate::cookie::Cookie;
use crate::multimap::MultiMap;
use crate::request::{Request, UNKNOWN_LENGTH};
use crate::{Error, Result};
use percent_encoding::percent_decode_str;

/// A delimiter-bounded token
#[derive(Debug, Clone, Copy)]
pub(crate) struct Token<'a> {
    pub text: &'a str,
    /// The token was closed by a line break rather than an inline delimiter
    pub end_of_line: bool,
}

impl<'a> Token<'a> {
    pub fn inline(text: &'a str) -> Self {
        Self {
            text,
            end_of_line: false,
        }
    }
}

/// Names held while waiting for their value token
#[derive(Debug, Default)]
pub(crate) struct Pending {
    header_name: Option<String>,
    cookie_name: Option<String>,
    param_name: Option<String>,
}

pub(crate) type Trigger = fn(ParserState, Token<'_>, &mut Pending, &mut Request) -> Result<ParserState>;

/// Trigger responsible for tokens produced in `state`
pub(crate) fn select(state: ParserState) -> Trigger {
    use ParserState::*;

    match state {
        Method => on_method,
        Path => on_path,
        Protocol => on_protocol,
        HeaderName | HeaderValue | UserAgentValue => on_header,
        CookieName | CookieValue => on_cookie,
        QsParamName | QsParamValue => on_query_param,
        BodyParamName | BodyParamValue => on_body_param,
        Body | Complete | Failed => on_unexpected,
    }
}

fn on_method(_: ParserState, token: Token<'_>, _: &mut Pending, request: &mut Request) -> Result<ParserState> {
    request.method = token.text.parse::<Method>()?;
    Ok(ParserState::Path)
}

fn on_path(_: ParserState, token: Token<'_>, pending: &mut Pending, request: &mut Request) -> Result<ParserState> {
    let (path, query) = match token.text.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (token.text, None),
    };
    request.path = percent_decode_str(path).decode_utf8_lossy().into_owned();

    if let Some(query) = query {
        feed_params(query, ParserState::QsParamName, pending, request)?;
    }
    Ok(ParserState::Protocol)
}

fn on_protocol(_: ParserState, token: Token<'_>, _: &mut Pending, request: &mut Request) -> Result<ParserState> {
    let malformed = || Error::parse(format!("Malformed protocol '{}', expected NAME/VERSION", token.text));

    let (name, version) = token.text.split_once('/').ok_or_else(malformed)?;
    if name.is_empty() || version.is_empty() || version.contains(char::is_whitespace) {
        return Err(malformed());
    }
    request.protocol_name = name.to_string();
    request.protocol_version = version.to_string();
    Ok(ParserState::HeaderName)
}

fn on_header(state: ParserState, token: Token<'_>, pending: &mut Pending, request: &mut Request) -> Result<ParserState> {
    if state == ParserState::HeaderName {
        if token.text.is_empty() {
            return Err(Error::parse("Empty header name"));
        }
        if token.text.eq_ignore_ascii_case("user-agent") {
            pending.header_name = Some(token.text.to_string());
            return Ok(ParserState::UserAgentValue);
        }
        if token.text.eq_ignore_ascii_case("cookie") {
            pending.header_name = None;
            return Ok(ParserState::CookieName);
        }
        pending.header_name = Some(token.text.to_string());
        return Ok(if token.end_of_line {
            ParserState::HeaderName
        } else {
            ParserState::HeaderValue
        });
    }

    let name = pending
        .header_name
        .clone()
        .ok_or_else(|| Error::parse(format!("Header value '{}' without a name", token.text)))?;

    if !token.text.is_empty() {
        if name.eq_ignore_ascii_case("content-length") {
            request.content_length = content_length(token.text, request.content_length)?;
        }
        request.headers.add(name, token.text.to_string());
    }

    if state == ParserState::UserAgentValue || token.end_of_line {
        pending.header_name = None;
        Ok(ParserState::HeaderName)
    } else {
        Ok(ParserState::HeaderValue)
    }
}

/// Digits only, within `i64`, and consistent with any earlier declaration
fn content_length(text: &str, declared: i64) -> Result<i64> {
    let length = text
        .bytes()
        .all(|b| b.is_ascii_digit())
        .then(|| text.parse::<i64>().ok())
        .flatten()
        .ok_or_else(|| Error::parse(format!("Content-Length header value '{}' is not a numeric format", text)))?;
    if declared != UNKNOWN_LENGTH && declared != length {
        return Err(Error::parse(format!(
            "Conflicting Content-Length values {} and {}",
            declared, length
        )));
    }
    Ok(length)
}

fn on_cookie(state: ParserState, token: Token<'_>, pending: &mut Pending, request: &mut Request) -> Result<ParserState> {
    let after_pair = if token.end_of_line {
        ParserState::HeaderName
    } else {
        ParserState::CookieName
    };

    if state == ParserState::CookieName {
        if token.text.is_empty() {
            return Ok(after_pair);
        }
        if token.end_of_line {
            return Err(Error::parse(format!("Malformed cookie pairing: '{}' has no value", token.text)));
        }
        pending.cookie_name = Some(token.text.to_string());
        return Ok(ParserState::CookieValue);
    }

    let name = pending
        .cookie_name
        .take()
        .ok_or_else(|| Error::parse(format!("Malformed cookie pairing: value '{}' has no name", token.text)))?;
    let cookie = Cookie::builder()
        .name(name.as_str())
        .value(token.text)
        .build()
        .map_err(|e| Error::parse(format!("Malformed cookie pairing for '{}': {}", name, e)))?;

    request.headers.add("Cookie".to_string(), format!("{}={}", cookie.name(), cookie.value()));
    request.cookies.push(cookie);
    Ok(after_pair)
}

fn on_query_param(state: ParserState, token: Token<'_>, pending: &mut Pending, request: &mut Request) -> Result<ParserState> {
    on_param(state, token, pending, &mut request.query, ParserState::QsParamName, ParserState::QsParamValue)
}

fn on_body_param(state: ParserState, token: Token<'_>, pending: &mut Pending, request: &mut Request) -> Result<ParserState> {
    on_param(state, token, pending, &mut request.parameters, ParserState::BodyParamName, ParserState::BodyParamValue)
}

fn on_param(
    state: ParserState,
    token: Token<'_>,
    pending: &mut Pending,
    target: &mut MultiMap<String, String>,
    name_state: ParserState,
    value_state: ParserState,
) -> Result<ParserState> {
    if state == name_state {
        pending.param_name = Some(token.text.to_string());
        return Ok(value_state);
    }
    let name = pending.param_name.take().unwrap_or_default();
    target.add(url_decode(&name), url_decode(token.text));
    Ok(name_state)
}

fn on_unexpected(state: ParserState, token: Token<'_>, _: &mut Pending, _: &mut Request) -> Result<ParserState> {
    Err(Error::parse(format!("Unexpected token '{}' in state {:?}", token.text, state)))
}

/// Run `name=value&name=value` text through the parameter trigger of `name_state`
pub(crate) fn feed_params(
    input: &str,
    name_state: ParserState,
    pending: &mut Pending,
    request: &mut Request,
) -> Result<()> {
    let trigger = select(name_state);
    let mut state = name_state;
    let mut start = 0;

    for (i, byte) in input.bytes().enumerate() {
        let in_name = state == name_state;
        if !(byte == b'&' || (in_name && byte == b'=')) {
            continue;
        }
        let text = &input[start..i];
        start = i + 1;

        if in_name {
            if text.is_empty() && byte == b'&' {
                continue;
            }
            state = trigger(state, Token::inline(text), pending, request)?;
            if byte == b'&' {
                state = trigger(state, Token::inline(""), pending, request)?;
            }
        } else {
            state = trigger(state, Token::inline(text), pending, request)?;
        }
    }

    let tail = &input[start..];
    if state != name_state {
        trigger(state, Token::inline(tail), pending, request)?;
    } else if !tail.is_empty() {
        let state = trigger(state, Token::inline(tail), pending, request)?;
        trigger(state, Token::inline(""), pending, request)?;
    }
    Ok(())
}

/// Decode `+` and percent-escapes
pub(crate) fn url_decode(input: &str) -> String {
    let spaced = input.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}
