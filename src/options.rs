// Procedure options - parsing, validation and layered loading
//
// Options reach a procedure in one of three ways: as name/value string pairs
// (the interactive option table), deserialized from a TOML file, or from
// `SALVAGE_*` environment variables. All three go through the same types.

use crate::{SalvageError, SalvageResult, DEFAULT_SKIP_BLOCKS};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Source access path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum Api {
    /// ATA PASS-THROUGH over SG_IO
    Ata,
    /// Plain positional reads through the kernel
    #[default]
    Posix,
}

impl Api {
    pub fn as_str(&self) -> &'static str {
        match self {
            Api::Ata => "ata",
            Api::Posix => "posix",
        }
    }

    /// Preferred path for a device
    pub fn suggested(ata_capable: bool) -> Self {
        if ata_capable {
            Api::Ata
        } else {
            Api::Posix
        }
    }
}

impl FromStr for Api {
    type Err = SalvageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ata" => Ok(Api::Ata),
            "posix" => Ok(Api::Posix),
            other => Err(SalvageError::invalid_option(
                "api",
                format!("unknown access path '{}', expected ata or posix", other),
            )),
        }
    }
}

impl TryFrom<String> for Api {
    type Error = SalvageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", rename_all = "lowercase")]
pub enum StrategyKind {
    Plain,
    #[default]
    Smart,
    #[serde(rename = "smart_noreverse")]
    SmartNoReverse,
    #[serde(rename = "skipfail")]
    SkipFail,
    #[serde(rename = "skipfail_noreverse")]
    SkipFailNoReverse,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Plain,
        StrategyKind::Smart,
        StrategyKind::SmartNoReverse,
        StrategyKind::SkipFail,
        StrategyKind::SkipFailNoReverse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Plain => "plain",
            StrategyKind::Smart => "smart",
            StrategyKind::SmartNoReverse => "smart_noreverse",
            StrategyKind::SkipFail => "skipfail",
            StrategyKind::SkipFailNoReverse => "skipfail_noreverse",
        }
    }

    pub fn allows_reverse(&self) -> bool {
        matches!(self, StrategyKind::Smart | StrategyKind::SkipFail)
    }
}

impl FromStr for StrategyKind {
    type Err = SalvageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| {
                SalvageError::invalid_option(
                    "read_strategy",
                    format!("unknown strategy '{}'", s.trim()),
                )
            })
    }
}

impl TryFrom<String> for StrategyKind {
    type Error = SalvageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options of the copy procedure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyOptions {
    pub api: Api,
    pub read_strategy: StrategyKind,
    pub dst_file: PathBuf,
    #[serde(deserialize_with = "deserialize_yes_no")]
    pub use_journal: bool,
    /// Skip distance in blocks of `SECTORS_AT_ONCE` sectors
    pub skip_blocks: u64,
    pub start_lba: u64,
    /// Explicit journal location; derived from the source name when unset
    pub journal_file: Option<PathBuf>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            api: Api::default(),
            read_strategy: StrategyKind::default(),
            dst_file: PathBuf::new(),
            use_journal: true,
            skip_blocks: DEFAULT_SKIP_BLOCKS,
            start_lba: 0,
            journal_file: None,
        }
    }
}

impl CopyOptions {
    /// Apply name/value pairs on top of the defaults
    pub fn from_settings<K, V>(settings: &[(K, V)]) -> SalvageResult<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (name, value) in settings {
            options.set(name.as_ref(), value.as_ref())?;
        }
        Ok(options)
    }

    pub fn set(&mut self, name: &str, value: &str) -> SalvageResult<()> {
        match name {
            "api" => self.api = value.parse()?,
            "read_strategy" => self.read_strategy = value.parse()?,
            "dst_file" => self.dst_file = PathBuf::from(value),
            "use_journal" => self.use_journal = parse_yes_no(name, value)?,
            "skip_blocks" => self.skip_blocks = parse_u64(name, value)?,
            "start_lba" => self.start_lba = parse_u64(name, value)?,
            "journal_file" => self.journal_file = Some(PathBuf::from(value)),
            other => {
                return Err(SalvageError::invalid_option(other, "unknown option"));
            }
        }
        Ok(())
    }

    /// Reject option combinations that cannot start a copy
    pub fn validate(&self) -> SalvageResult<()> {
        if self.dst_file.as_os_str().is_empty() {
            return Err(SalvageError::invalid_option(
                "dst_file",
                "destination path is required",
            ));
        }
        if self.skip_blocks == 0 {
            return Err(SalvageError::invalid_option(
                "skip_blocks",
                "must be at least one block",
            ));
        }
        Ok(())
    }

    /// Layered load: defaults, then the TOML file, then `SALVAGE_*`
    /// environment variables, then the explicit overrides.
    pub fn load(config_file: Option<&Path>, overrides: &[(&str, String)]) -> SalvageResult<Self> {
        Self::load_with_api_source(config_file, overrides).map(|(options, _)| options)
    }

    /// Same as `load`, also reporting whether any layer set `api`.
    /// Without one the caller is free to suggest an access path from the device.
    pub fn load_with_api_source(
        config_file: Option<&Path>,
        overrides: &[(&str, String)],
    ) -> SalvageResult<(Self, bool)> {
        let mut builder = config::Config::builder();

        match config_file {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = default_config_path() {
                    builder = builder.add_source(config::File::from(path).required(false));
                }
            }
        }
        builder = builder.add_source(config::Environment::with_prefix("SALVAGE"));

        for (name, value) in overrides {
            builder = builder.set_override(*name, value.as_str())?;
        }

        let layered = builder.build()?;
        let api_configured = layered.get_string("api").is_ok();
        let options: CopyOptions = layered.try_deserialize()?;
        tracing::debug!(
            api = %options.api,
            api_configured,
            strategy = %options.read_strategy,
            journal = options.use_journal,
            skip_blocks = options.skip_blocks,
            "Copy options loaded"
        );
        Ok((options, api_configured))
    }
}

/// Options of the read test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadTestOptions {
    pub api: Api,
    pub start_lba: u64,
}

impl ReadTestOptions {
    pub fn from_settings<K, V>(settings: &[(K, V)]) -> SalvageResult<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (name, value) in settings {
            match name.as_ref() {
                "api" => options.api = value.as_ref().parse()?,
                "start_lba" => options.start_lba = parse_u64("start_lba", value.as_ref())?,
                other => return Err(SalvageError::invalid_option(other, "unknown option")),
            }
        }
        Ok(options)
    }
}

/// `salvage.toml` in the per-user configuration directory
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "salvage", "salvage")
        .map(|dirs| dirs.config_dir().join("salvage.toml"))
}

fn parse_u64(name: &str, value: &str) -> SalvageResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| SalvageError::invalid_option(name, format!("'{}' is not a number", value)))
}

fn parse_yes_no(name: &str, value: &str) -> SalvageResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Ok(true),
        "no" | "false" | "0" => Ok(false),
        _ => Err(SalvageError::invalid_option(
            name,
            format!("expected yes or no, got '{}'", value),
        )),
    }
}

fn deserialize_yes_no<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Text(text) => {
            parse_yes_no("use_journal", &text).map_err(serde::de::Error::custom)
        }
    }
}
