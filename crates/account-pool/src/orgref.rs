//! Organization reference extraction from upstream URLs
//!
//! The upstream service embeds the organization identifier in request
//! paths as the segment immediately following `organizations`, e.g.
//! `https://upstream.example/api/organizations/org-9f2/usage`. The grammar
//! here is exactly that: scan path segments and return the non-empty
//! segment after the first `organizations` marker. Query string and
//! fragment are ignored.

/// Extract the organization reference from an upstream request URL.
///
/// Returns `None` when the URL carries no `organizations/<ref>` segment
/// pair.
pub fn extract_org_ref(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment == "organizations" {
            return segments.next();
        }
    }
    None
}
