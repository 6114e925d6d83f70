//! Session configuration.
//!
//! Every option struct is validated before any I/O happens: too many
//! filters, an unparsable option string or an unsupported combination is
//! reported as a configuration error and leaves no file behind.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::codes::{FILTER_MAX, Filter, Format};
use crate::progress::CancelToken;
use crate::{Error, Result};

/// Default size of blocks pulled from decoders and host streams.
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

/// Smallest accepted block size; format detection needs one tar header.
pub const MIN_BLOCK_SIZE: usize = 512;

/// Keys understood by each module of the option string.
const KNOWN_OPTIONS: &[(&str, &[&str])] = &[
    ("gzip", &["compression-level"]),
    ("bzip2", &["compression-level"]),
    ("xz", &["compression-level"]),
    ("lzma", &["compression-level"]),
    ("zstd", &["compression-level"]),
    ("lz4", &["compression-level"]),
    ("zip", &["compression", "encryption"]),
    ("tar", &["read_concatenated_archives"]),
];

/// Value carried by one option-string item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    /// `key` alone: the option is switched on.
    Enabled,
    /// `!key`: the option is switched off.
    Disabled,
    /// `key=value`.
    Value(String),
}

/// One `[module:]key[=value]` item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleOption {
    /// Module the option is addressed to; `None` addresses all modules.
    pub module: Option<String>,
    /// Option key.
    pub key: String,
    /// Option value.
    pub value: OptionValue,
}

/// Parsed free-form option string, e.g. `"zip:compression=store,gzip:compression-level=9"`.
///
/// Items are comma separated. A `!` prefix disables a flag. Options
/// addressed to a module that is not used by the session are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionString {
    items: Vec<ModuleOption>,
}

impl FromStr for OptionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut items = Vec::new();
        for raw in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            let (negated, body) = match raw.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, raw),
            };
            let (spec, value) = match body.split_once('=') {
                Some((spec, value)) => (spec, Some(value)),
                None => (body, None),
            };
            let (module, key) = match spec.split_once(':') {
                Some((module, key)) => (Some(module), key),
                None => (None, spec),
            };
            if key.is_empty() || module.is_some_and(str::is_empty) {
                return Err(Error::InvalidOption(format!("malformed option '{raw}'")));
            }
            let value = match (negated, value) {
                (true, Some(_)) => {
                    return Err(Error::InvalidOption(format!(
                        "negated option '{raw}' cannot take a value"
                    )));
                }
                (true, None) => OptionValue::Disabled,
                (false, None) => OptionValue::Enabled,
                (false, Some(v)) => OptionValue::Value(v.to_string()),
            };
            let option = ModuleOption {
                module: module.map(str::to_string),
                key: key.to_string(),
                value,
            };
            check_known(&option)?;
            items.push(option);
        }
        Ok(Self { items })
    }
}

fn check_known(option: &ModuleOption) -> Result<()> {
    match &option.module {
        Some(module) => {
            let keys = KNOWN_OPTIONS
                .iter()
                .find(|(name, _)| *name == module.as_str())
                .map(|(_, keys)| *keys)
                .ok_or_else(|| Error::InvalidOption(format!("unknown module '{module}'")))?;
            if !keys.contains(&option.key.as_str()) {
                return Err(Error::InvalidOption(format!(
                    "undefined option '{module}:{}'",
                    option.key
                )));
            }
        }
        None => {
            let known = KNOWN_OPTIONS
                .iter()
                .any(|(_, keys)| keys.contains(&option.key.as_str()));
            if !known {
                return Err(Error::InvalidOption(format!(
                    "undefined option '{}'",
                    option.key
                )));
            }
        }
    }
    Ok(())
}

impl OptionString {
    /// Parsed items in order of appearance.
    pub fn items(&self) -> &[ModuleOption] {
        &self.items
    }

    /// Last value given for `key` that applies to `module`.
    pub fn get(&self, module: &str, key: &str) -> Option<&OptionValue> {
        self.items
            .iter()
            .rev()
            .find(|item| item.key == key && item.module.as_deref().is_none_or(|m| m == module))
            .map(|item| &item.value)
    }

    /// Returns `true` if a flag is switched on for `module`.
    pub fn is_enabled(&self, module: &str, key: &str) -> bool {
        matches!(
            self.get(module, key),
            Some(OptionValue::Enabled | OptionValue::Value(_))
        )
    }

    /// String value of `key` for `module`.
    pub fn value(&self, module: &str, key: &str) -> Result<Option<&str>> {
        match self.get(module, key) {
            Some(OptionValue::Value(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(Error::InvalidOption(format!(
                "option '{module}:{key}' requires a value"
            ))),
            None => Ok(None),
        }
    }

    /// Compression level requested for `filter`, checked against its range.
    pub fn compression_level(&self, filter: Filter) -> Result<Option<u32>> {
        let range = match filter {
            Filter::Gzip | Filter::Xz | Filter::Lzma => 0..=9,
            Filter::Bzip2 | Filter::Lz4 => 1..=9,
            Filter::Zstd => 1..=22,
            _ => return Ok(None),
        };
        let Some(raw) = self.value(filter.name(), "compression-level")? else {
            return Ok(None);
        };
        match raw.parse::<u32>() {
            Ok(level) if range.contains(&level) => Ok(Some(level)),
            _ => Err(Error::InvalidOption(format!(
                "{filter} compression level must be within {}..={}, got '{raw}'",
                range.start(),
                range.end()
            ))),
        }
    }
}

fn parse_options(options: Option<&str>) -> Result<OptionString> {
    options.map_or_else(|| Ok(OptionString::default()), str::parse)
}

fn check_filters(filters: &[Filter]) -> Result<()> {
    if filters.len() > FILTER_MAX {
        return Err(Error::TooManyFilters {
            count: filters.len(),
            max: FILTER_MAX,
        });
    }
    filters.iter().try_for_each(|f| f.ensure_supported())
}

fn check_block_size(block_size: usize) -> Result<()> {
    if block_size < MIN_BLOCK_SIZE {
        return Err(Error::InvalidOption(format!(
            "block size must be at least {MIN_BLOCK_SIZE} bytes, got {block_size}"
        )));
    }
    Ok(())
}

/// Options for reading sessions.
///
/// # Example
///
/// ```rust
/// use arcstream::{Filter, Format, ReadOptions};
///
/// let options = ReadOptions::new()
///     .filter(Filter::Gzip)
///     .format(Format::Tar)
///     .options("tar:read_concatenated_archives");
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub(crate) filters: Option<Vec<Filter>>,
    pub(crate) format: Option<Format>,
    pub(crate) options: Option<String>,
    pub(crate) passphrase: Option<String>,
    pub(crate) block_size: usize,
    pub(crate) cancel: CancelToken,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            filters: None,
            format: None,
            options: None,
            passphrase: None,
            block_size: DEFAULT_BLOCK_SIZE,
            cancel: CancelToken::default(),
        }
    }
}

impl ReadOptions {
    /// Creates default options: detect filters and format.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a filter, disabling filter detection.
    ///
    /// Filters are listed in the order they were applied when the archive
    /// was written, so the same list used to write an archive reads it.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.get_or_insert_with(Vec::new).push(filter);
        self
    }

    /// Replaces the filter list, disabling filter detection.
    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters = Some(filters.into_iter().collect());
        self
    }

    /// Forces a format instead of detecting one.
    pub fn format(mut self, format: Format) -> Self {
        self.format = Some(format);
        self
    }

    /// Sets the free-form option string.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Sets the passphrase for encrypted entries.
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Sets the block size used for host reads and decoded blocks.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Attaches a cancellation token.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// The cancellation token checked by this session.
    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Checks the configuration without touching any stream.
    pub fn validate(&self) -> Result<()> {
        self.option_string().map(|_| ())
    }

    pub(crate) fn option_string(&self) -> Result<OptionString> {
        if let Some(filters) = &self.filters {
            check_filters(filters)?;
        }
        if let Some(format) = self.format {
            format.ensure_supported()?;
        }
        check_block_size(self.block_size)?;
        parse_options(self.options.as_deref())
    }
}

/// How a write session handles the entry size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Deferred for tar, direct for zip and raw.
    #[default]
    Auto,
    /// Stage data in a temporary file, then write one sized entry on close.
    Deferred,
    /// Stream data straight into an entry whose size is left unset.
    ///
    /// A failure while writing leaves a truncated destination behind.
    Direct,
}

/// Options for write sessions and packing.
///
/// # Example
///
/// ```rust
/// use arcstream::{Filter, Format, WriteOptions};
///
/// let options = WriteOptions::new(Format::Tar)
///     .filter(Filter::Gzip)
///     .options("gzip:compression-level=9");
/// assert!(options.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub(crate) format: Format,
    pub(crate) filters: Vec<Filter>,
    pub(crate) options: Option<String>,
    pub(crate) passphrase: Option<String>,
    pub(crate) mode: WriteMode,
    pub(crate) block_size: usize,
    pub(crate) cancel: CancelToken,
}

impl WriteOptions {
    /// Creates options for `format` with no filters.
    pub fn new(format: Format) -> Self {
        Self {
            format,
            filters: Vec::new(),
            options: None,
            passphrase: None,
            mode: WriteMode::Auto,
            block_size: DEFAULT_BLOCK_SIZE,
            cancel: CancelToken::default(),
        }
    }

    /// Appends a filter; the first filter is applied first.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Replaces the filter list.
    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters = filters.into_iter().collect();
        self
    }

    /// Sets the free-form option string.
    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Encrypts entries with `passphrase` (zip only).
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Chooses the write discipline.
    pub fn mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the chunk size used by copy loops.
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Attaches a cancellation token.
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// The target format.
    pub fn target_format(&self) -> Format {
        self.format
    }

    /// Checks the configuration without touching the destination.
    pub fn validate(&self) -> Result<()> {
        self.resolve().map(|_| ())
    }

    /// Validates and returns the parsed option string with the resolved
    /// write discipline.
    pub(crate) fn resolve(&self) -> Result<(OptionString, WriteMode)> {
        check_filters(&self.filters)?;
        self.format.ensure_supported()?;
        check_block_size(self.block_size)?;
        let options = parse_options(self.options.as_deref())?;
        for filter in &self.filters {
            options.compression_level(*filter)?;
        }

        let active_filters = self.filters.iter().any(|f| *f != Filter::None);
        if self.format == Format::Zip && active_filters {
            return Err(Error::unsupported(
                "zip archives cannot be wrapped in a compression filter",
            ));
        }
        if self.passphrase.is_some() && self.format != Format::Zip {
            return Err(Error::unsupported(format!(
                "format '{}' does not support encryption",
                self.format
            )));
        }
        #[cfg(feature = "zip")]
        {
            if self.format == Format::Zip {
                crate::codec::zip::EntrySettings::from_options(&options, self.passphrase.is_some())?;
            }
        }

        let mode = match (self.mode, self.format) {
            (WriteMode::Direct, Format::Tar) => {
                return Err(Error::unsupported(
                    "tar entries need their size before data; use deferred mode",
                ));
            }
            (WriteMode::Auto, Format::Tar) => WriteMode::Deferred,
            (WriteMode::Auto, _) => WriteMode::Direct,
            (mode, _) => mode,
        };
        Ok((options, mode))
    }
}

/// Options for [`extract_entries`](crate::extract_entries).
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub(crate) read: ReadOptions,
    pub(crate) destination: PathBuf,
    pub(crate) strip_components: usize,
    pub(crate) preserve_permissions: bool,
    pub(crate) preserve_mtime: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            read: ReadOptions::default(),
            destination: PathBuf::from("."),
            strip_components: 0,
            preserve_permissions: true,
            preserve_mtime: true,
        }
    }
}

impl ExtractOptions {
    /// Creates default options extracting into the current directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that receives the extracted entries.
    pub fn destination(mut self, dir: impl AsRef<Path>) -> Self {
        self.destination = dir.as_ref().to_path_buf();
        self
    }

    /// Removes `count` leading path components from every entry.
    pub fn strip_components(mut self, count: usize) -> Self {
        self.strip_components = count;
        self
    }

    /// Whether to restore permission bits.
    pub fn preserve_permissions(mut self, preserve: bool) -> Self {
        self.preserve_permissions = preserve;
        self
    }

    /// Whether to restore modification times.
    pub fn preserve_mtime(mut self, preserve: bool) -> Self {
        self.preserve_mtime = preserve;
        self
    }

    /// Options for the underlying read session.
    pub fn read_options(mut self, read: ReadOptions) -> Self {
        self.read = read;
        self
    }
}

/// Options for [`pack_files`](crate::pack_files).
#[derive(Debug, Clone)]
pub struct PackOptions {
    pub(crate) write: WriteOptions,
    pub(crate) strip_prefix: Option<PathBuf>,
}

impl PackOptions {
    /// Packs into `format` with default write options.
    pub fn new(format: Format) -> Self {
        Self::from(WriteOptions::new(format))
    }

    /// Stores entry names relative to `prefix`.
    pub fn strip_prefix(mut self, prefix: impl AsRef<Path>) -> Self {
        self.strip_prefix = Some(prefix.as_ref().to_path_buf());
        self
    }
}

impl From<WriteOptions> for PackOptions {
    fn from(write: WriteOptions) -> Self {
        Self {
            write,
            strip_prefix: None,
        }
    }
}
