//! Filename-based asset classification.
//!
//! Release assets carry no structured platform metadata, so everything here
//! works on substrings of the file name. The rule tables encode the naming
//! conventions of the bundler that produced the assets, quirks included:
//! `arm64` classifies as `armv7`, a `mac` request skips the archive checks,
//! and a Windows `aarch64` request accepts any architecture.

use crate::release::Asset;
use std::fmt;
use std::str::FromStr;

/// Platforms an updater may ask about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Darwin,
    Mac,
    Windows,
    Linux,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Darwin => "darwin",
            Platform::Mac => "mac",
            Platform::Windows => "windows",
            Platform::Linux => "linux",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for platforms outside [`Platform`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported platform: {0}")]
pub struct UnknownPlatform(pub String);

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "darwin" => Ok(Platform::Darwin),
            "mac" => Ok(Platform::Mac),
            "windows" => Ok(Platform::Windows),
            "linux" => Ok(Platform::Linux),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}

/// Architecture inferred from an asset file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    I686,
    X86_64,
    Armv7,
    Aarch64,
    Universal,
}

impl Arch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::I686 => "i686",
            Arch::X86_64 => "x86_64",
            Arch::Armv7 => "armv7",
            Arch::Aarch64 => "aarch64",
            Arch::Universal => "universal",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered arch rules; the first rule with a matching keyword wins.
const ARCH_RULES: &[(&[&str], Arch)] = &[
    (&["aarch64"], Arch::Aarch64),
    (&["arm64"], Arch::Armv7),
    (&["x64", "amd64", "win64"], Arch::X86_64),
    (&["i686", "win32", "x32"], Arch::I686),
    (&["universal"], Arch::Universal),
];

const DEFAULT_ARCH: Arch = Arch::X86_64;

fn has_keywords(s: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| s.contains(k))
}

/// Infer the architecture an asset was built for.
pub fn infer_arch(filename: &str) -> Arch {
    ARCH_RULES
        .iter()
        .find(|(keywords, _)| has_keywords(filename, keywords))
        .map(|(_, arch)| *arch)
        .unwrap_or(DEFAULT_ARCH)
}

/// Text after the last `.`; the whole name when there is no dot.
pub fn extension(filename: &str) -> &str {
    filename.rsplit('.').next().unwrap_or(filename)
}

struct Candidate<'a> {
    platform: &'a str,
    arch: &'a str,
    filename: &'a str,
    extension: &'a str,
    inferred: Arch,
}

impl<'a> Candidate<'a> {
    fn new(platform: &'a str, arch: &'a str, filename: &'a str) -> Self {
        Self {
            platform,
            arch,
            filename,
            extension: extension(filename),
            inferred: infer_arch(filename),
        }
    }

    fn arch_is(&self, arch: Arch) -> bool {
        self.arch == arch.as_str()
    }

    fn arch_matches_inferred(&self) -> bool {
        self.arch_is(self.inferred)
    }
}

/// A platform rule: the gate selects the asset family, the arch test
/// decides whether the requested architecture is served by it.
struct MatchRule {
    target: Platform,
    gate: fn(&Candidate<'_>) -> bool,
    arch: fn(&Candidate<'_>) -> bool,
}

impl MatchRule {
    fn apply(&self, candidate: &Candidate<'_>) -> Option<Platform> {
        ((self.gate)(candidate) && (self.arch)(candidate)).then_some(self.target)
    }
}

fn apply_rules(rules: &[MatchRule], candidate: &Candidate<'_>) -> Option<Platform> {
    rules.iter().find_map(|rule| rule.apply(candidate))
}

const UPDATE_RULES: &[MatchRule] = &[
    MatchRule {
        target: Platform::Darwin,
        gate: update_darwin_gate,
        arch: update_darwin_arch,
    },
    MatchRule {
        target: Platform::Windows,
        gate: update_windows_gate,
        arch: update_windows_arch,
    },
    MatchRule {
        target: Platform::Linux,
        gate: update_linux_gate,
        arch: update_linux_arch,
    },
];

// A `mac` request passes without the keyword and archive checks.
fn update_darwin_gate(c: &Candidate<'_>) -> bool {
    (has_keywords(c.filename, &[".app", "darwin", "osx"])
        && c.extension == "gz"
        && c.platform == Platform::Darwin.as_str())
        || c.platform == Platform::Mac.as_str()
}

fn update_darwin_arch(c: &Candidate<'_>) -> bool {
    c.arch_matches_inferred()
        || (c.arch_is(Arch::Aarch64) && c.inferred == Arch::Armv7)
        || c.filename.contains("universal")
}

fn update_windows_gate(c: &Candidate<'_>) -> bool {
    has_keywords(
        c.filename,
        &["win64", "win32", "windows", ".msi", ".nsis", "setup"],
    ) && c.extension == "zip"
        && c.platform == Platform::Windows.as_str()
}

// `aarch64` accepts every Windows bundle regardless of the inferred arch.
fn update_windows_arch(c: &Candidate<'_>) -> bool {
    c.arch_matches_inferred() || c.arch_is(Arch::Aarch64)
}

fn update_linux_gate(c: &Candidate<'_>) -> bool {
    c.filename.contains("AppImage")
        && c.extension == "gz"
        && c.platform == Platform::Linux.as_str()
}

fn update_linux_arch(c: &Candidate<'_>) -> bool {
    c.arch_matches_inferred()
}

const DOWNLOAD_RULES: &[MatchRule] = &[
    MatchRule {
        target: Platform::Mac,
        gate: download_mac_gate,
        arch: download_mac_arch,
    },
    MatchRule {
        target: Platform::Windows,
        gate: download_windows_gate,
        arch: download_windows_arch,
    },
];

fn download_mac_gate(c: &Candidate<'_>) -> bool {
    c.extension == "dmg" && c.platform == Platform::Mac.as_str()
}

fn download_mac_arch(c: &Candidate<'_>) -> bool {
    c.arch_matches_inferred()
        || (c.inferred == Arch::Aarch64 && c.arch == "m1")
        || (c.inferred == Arch::Universal && c.arch == "universal")
}

fn download_windows_gate(c: &Candidate<'_>) -> bool {
    has_keywords(c.filename, &["setup", ".nsis"])
        && (c.extension == "zip" || c.extension == "exe")
        && c.platform == Platform::Windows.as_str()
}

fn download_windows_arch(c: &Candidate<'_>) -> bool {
    c.arch_matches_inferred()
        || (c.inferred == Arch::X86_64 && c.arch == "x64")
        || (c.inferred == Arch::Armv7 && c.arch == "arm64")
}

/// Classify an asset for the update-check flow.
///
/// Returns the normalized platform the asset serves, or `None` when it is not
/// an updater bundle for the requested platform and architecture.
pub fn check_platform(platform: &str, arch: &str, filename: &str) -> Option<Platform> {
    apply_rules(UPDATE_RULES, &Candidate::new(platform, arch, filename))
}

/// Classify an asset for the direct "download latest installer" flow.
pub fn check_platform_downloads(platform: &str, arch: &str, filename: &str) -> Option<Platform> {
    apply_rules(DOWNLOAD_RULES, &Candidate::new(platform, arch, filename))
}

/// First asset, in release order, that [`check_platform`] accepts.
pub fn select_update_asset<'a>(
    platform: &str,
    arch: &str,
    assets: &'a [Asset],
) -> Option<(&'a Asset, Platform)> {
    assets.iter().find_map(|asset| {
        let found = check_platform(platform, arch, &asset.name);
        if found.is_none() {
            tracing::debug!(platform, arch, name = %asset.name, "asset does not match");
        }
        found.map(|target| (asset, target))
    })
}

/// First asset, in release order, that [`check_platform_downloads`] accepts.
pub fn select_download_asset<'a>(platform: &str, arch: &str, assets: &'a [Asset]) -> Option<&'a Asset> {
    assets
        .iter()
        .find(|asset| check_platform_downloads(platform, arch, &asset.name).is_some())
}

/// The detached signature asset for `filename`, named `<filename>.sig`
/// compared case-insensitively.
pub fn find_signature_asset<'a>(filename: &str, assets: &'a [Asset]) -> Option<&'a Asset> {
    let wanted = format!("{}.sig", filename.to_lowercase());
    assets.iter().find(|asset| asset.name.to_lowercase() == wanted)
}
