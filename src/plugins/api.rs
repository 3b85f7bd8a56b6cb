//! Host API exposed into every plugin context.
//!
//! Plugins see exactly three routing helpers (`get_args`, `url_encode`,
//! `url_encode_path`) plus a handful of string utilities. Everything is pure;
//! none of these touch the filesystem or the network.

use mlua::Lua;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// `application/x-www-form-urlencoded` alphabet: unreserved bytes pass
/// through, space becomes `+`, everything else is `%HH`.
const FORM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b' ');

/// RFC 3986 path component alphabet: `/` passes through, space is `%20`.
const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Percent-encode a query-string value, form-urlencoded style.
pub fn url_encode(s: &str) -> String {
    utf8_percent_encode(s, FORM).to_string().replace(' ', "+")
}

/// Percent-encode a URL path component, preserving `/`.
pub fn url_encode_path(s: &str) -> String {
    utf8_percent_encode(s, PATH).to_string()
}

/// Return the argument tail of `full_args`, treating `binding` as the
/// command prefix.
///
/// The binding match is case-insensitive and must be followed by ASCII
/// whitespace or end-of-string. Interior whitespace of the tail is kept
/// verbatim; only the run separating binding and tail is consumed. Any
/// mismatch yields the empty string.
pub fn get_args(full_args: &str, binding: &str) -> String {
    if binding.is_empty() {
        return String::new();
    }
    let stripped = full_args.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let head = match stripped.get(..binding.len()) {
        Some(head) => head,
        None => return String::new(),
    };
    if !head.eq_ignore_ascii_case(binding) {
        return String::new();
    }
    let rest = &stripped[binding.len()..];
    if rest.is_empty() {
        return String::new();
    }
    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        // Binding is a prefix of a longer token ("ghx" vs "gh").
        return String::new();
    }
    rest.trim_start_matches(|c: char| c.is_ascii_whitespace())
        .to_string()
}

/// Register the host API on a freshly sandboxed Lua state.
pub fn register_host_api(lua: &Lua) -> mlua::Result<()> {
    let g = lua.globals();

    g.set(
        "get_args",
        lua.create_function(|_, (full_args, binding): (String, String)| {
            Ok(get_args(&full_args, &binding))
        })?,
    )?;

    g.set(
        "url_encode",
        lua.create_function(|_, s: String| Ok(url_encode(&s)))?,
    )?;

    g.set(
        "url_encode_path",
        lua.create_function(|_, s: String| Ok(url_encode_path(&s)))?,
    )?;

    g.set(
        "trim",
        lua.create_function(|_, s: String| Ok(s.trim().to_string()))?,
    )?;
    g.set(
        "split",
        lua.create_function(|lua, (s, delim): (String, String)| {
            lua.create_sequence_from(s.split(&delim).map(|p| p.to_string()).collect::<Vec<_>>())
        })?,
    )?;
    g.set(
        "starts_with",
        lua.create_function(|_, (s, p): (String, String)| Ok(s.starts_with(&p)))?,
    )?;
    g.set(
        "ends_with",
        lua.create_function(|_, (s, p): (String, String)| Ok(s.ends_with(&p)))?,
    )?;
    g.set(
        "contains",
        lua.create_function(|_, (s, p): (String, String)| Ok(s.contains(&p)))?,
    )?;
    g.set(
        "upper",
        lua.create_function(|_, s: String| Ok(s.to_uppercase()))?,
    )?;
    g.set(
        "lower",
        lua.create_function(|_, s: String| Ok(s.to_lowercase()))?,
    )?;

    Ok(())
}
