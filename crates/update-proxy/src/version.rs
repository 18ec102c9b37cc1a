use crate::error::Result;
use semver::Version;

/// Normalize a release tag: lowercase, then drop one leading `v`.
pub fn sanitize_tag(tag: &str) -> String {
    let lowered = tag.to_lowercase();
    match lowered.strip_prefix('v') {
        Some(rest) => rest.to_string(),
        None => lowered,
    }
}

/// Parse the version of a release from its tag.
pub fn release_version(tag: &str) -> Result<Version> {
    parse_valid(&sanitize_tag(tag))
}

/// Parse a client-supplied version.
pub fn client_version(raw: &str) -> Result<Version> {
    parse_valid(raw)
}

/// Strict semver validity: surrounding whitespace and one leading `v` are
/// accepted, range operators such as `=` are not.
fn parse_valid(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Ok(Version::parse(bare)?)
}

/// `true` when `remote` has strictly higher precedence than `current`.
/// Build metadata does not take part in the comparison.
pub fn is_newer(remote: &Version, current: &Version) -> bool {
    (remote.major, remote.minor, remote.patch, &remote.pre)
        > (current.major, current.minor, current.patch, &current.pre)
}
