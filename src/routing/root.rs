//! Root fallback for paths no prefix claims.
//!
//! Mirrors what a user expects from a bare server root: a prefix typed
//! without its trailing slash is redirected to the canonical form, and
//! the root path itself shows a listing of what is mounted.

use super::prefix::PrefixRouter;

/// What the fallback decided for an unmatched path.
#[derive(Debug, PartialEq, Eq)]
pub enum RootOutcome {
    /// Permanent redirect to the canonical `/…/` form.
    Redirect(String),
    /// HTML listing of the registered prefixes.
    Listing(String),
    /// Nothing to offer; 404.
    NotFound,
}

/// Decide the fallback response for a path no prefix matched.
///
/// `list_prefixes` disables the listing for deployments that treat the
/// mounted prefix set as sensitive.
pub fn fallback(
    router: &PrefixRouter,
    path: &str,
    query: Option<&str>,
    list_prefixes: bool,
) -> RootOutcome {
    // `/docs` when `/docs/` is mounted: redirect to the canonical form
    if !path.ends_with('/') {
        let canonical = format!("{path}/");
        if router.contains(&canonical) {
            let location = match query {
                Some(q) => format!("{canonical}?{q}"),
                None => canonical,
            };
            return RootOutcome::Redirect(location);
        }
    }
    if path == "/" && list_prefixes {
        return RootOutcome::Listing(render_listing(&router.prefixes()));
    }
    RootOutcome::NotFound
}

fn render_listing(prefixes: &[String]) -> String {
    let mut body = String::from(
        "<!DOCTYPE html>\n<html><head><title>Index</title></head><body>\n<ul>\n",
    );
    for prefix in prefixes {
        let escaped = html_escape(prefix);
        body.push_str(&format!("<li><a href=\"{escaped}\">{escaped}</a></li>\n"));
    }
    body.push_str("</ul>\n</body></html>\n");
    body
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
