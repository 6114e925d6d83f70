//! Command implementations for the CLI tool.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use arcstream::{
    ArchiveReader, ArchiveWriter, CancelToken, Error, ExtractOptions, Filter, Format,
    PackOptions, ReadOptions, Result, Selector, WriteOptions, extract_entries, filter_table,
    format_table, list_entries, pack_files,
};

use crate::exit_codes::{ExitCode, error_to_exit_code};
use crate::output::create_formatter;
use crate::password::{confirm_passphrase, get_passphrase};
use crate::{OutputFormat, ReadArgs, WriteArgs};

/// State shared by all commands.
pub struct Context {
    pub format: OutputFormat,
    pub quiet: bool,
    pub cancel: CancelToken,
}

/// Configuration for the extract command.
pub struct ExtractConfig<'a> {
    pub archive_path: &'a Path,
    pub output_dir: &'a Path,
    pub names: Vec<String>,
    pub indices: Vec<usize>,
    pub strip_components: usize,
    pub preserve: bool,
}

fn fail(error: &Error) -> ExitCode {
    eprintln!("Error: {error}");
    error_to_exit_code(error)
}

fn parse_filters(names: &[String]) -> Result<Vec<Filter>> {
    names.iter().map(|name| name.parse()).collect()
}

fn read_options(context: &Context, args: ReadArgs) -> Result<ReadOptions> {
    let mut options = ReadOptions::new().cancel_token(context.cancel.clone());
    if !args.filters.is_empty() {
        options = options.filters(parse_filters(&args.filters)?);
    }
    if let Some(name) = &args.archive_type {
        options = options.format(name.parse::<Format>()?);
    }
    if let Some(string) = args.options {
        options = options.options(string);
    }
    if let Some(passphrase) = get_passphrase(args.password, args.ask_password) {
        options = options.passphrase(passphrase);
    }
    options.validate()?;
    Ok(options)
}

fn write_options(context: &Context, format: Format, args: WriteArgs) -> Result<WriteOptions> {
    let mut options = WriteOptions::new(format)
        .filters(parse_filters(&args.filters)?)
        .cancel_token(context.cancel.clone());
    if let Some(string) = args.options {
        options = options.options(string);
    }
    let passphrase = match args.password {
        Some(passphrase) => Some(passphrase),
        None if args.ask_password => confirm_passphrase(),
        None => None,
    };
    if let Some(passphrase) = passphrase {
        options = options.passphrase(passphrase);
    }
    options.validate()?;
    Ok(options)
}

/// List command implementation
pub fn list(context: &Context, archive: &Path, args: ReadArgs) -> ExitCode {
    let result = read_options(context, args).and_then(|options| list_entries(archive, &options));
    match result {
        Ok(entries) => {
            print!("{}", create_formatter(context.format).format_list(&entries));
            ExitCode::Success
        }
        Err(e) => fail(&e),
    }
}

/// Cat command implementation
pub fn cat(
    context: &Context,
    archive: &Path,
    entry: Option<String>,
    index: Option<usize>,
    raw: bool,
    args: ReadArgs,
) -> ExitCode {
    let selector = match (entry, index) {
        _ if raw => Selector::RawSingle,
        (Some(name), _) => Selector::ByName(name),
        (None, Some(index)) => Selector::ByIndex(index),
        (None, None) => Selector::All,
    };
    let result = read_options(context, args).and_then(|options| {
        let mut reader = ArchiveReader::new(archive, selector, options)?;
        {
            let mut stream = reader.open()?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            io::copy(&mut stream, &mut out).map_err(unwrap_io)?;
            out.flush()?;
        }
        reader.close()
    });
    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => fail(&e),
    }
}

/// Recovers an arcstream error that travelled through `io::copy`.
fn unwrap_io(err: io::Error) -> Error {
    if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
        if let Some(Ok(inner)) = err.into_inner().map(|inner| inner.downcast::<Error>()) {
            return *inner;
        }
        return Error::InvalidState("error lost in transit");
    }
    Error::Io(err)
}

/// Extract command implementation
pub fn extract(context: &Context, config: &ExtractConfig<'_>, args: ReadArgs) -> ExitCode {
    let selector = if !config.names.is_empty() {
        Selector::by_names(config.names.iter().cloned())
    } else if !config.indices.is_empty() {
        Selector::by_indices(config.indices.iter().copied())
    } else {
        Selector::All
    };
    let result = read_options(context, args).and_then(|read| {
        let options = ExtractOptions::new()
            .read_options(read)
            .destination(config.output_dir)
            .strip_components(config.strip_components)
            .preserve_permissions(config.preserve)
            .preserve_mtime(config.preserve);
        extract_entries(config.archive_path, &selector, &options)
    });
    match result {
        Ok(names) => {
            if !context.quiet {
                print!("{}", create_formatter(context.format).format_extracted(&names));
            }
            ExitCode::Success
        }
        Err(e) => fail(&e),
    }
}

/// Pack command implementation
pub fn pack(
    context: &Context,
    archive: &Path,
    files: &[PathBuf],
    archive_type: &str,
    strip_prefix: Option<PathBuf>,
    args: WriteArgs,
) -> ExitCode {
    let result = archive_type
        .parse::<Format>()
        .and_then(|format| write_options(context, format, args))
        .and_then(|write| {
            let mut options = PackOptions::from(write);
            if let Some(prefix) = strip_prefix {
                options = options.strip_prefix(prefix);
            }
            pack_files(archive, files, &options)
        });
    match result {
        Ok(packed) => {
            if !context.quiet {
                print!("{}", create_formatter(context.format).format_packed(&packed));
            }
            ExitCode::Success
        }
        Err(e) => fail(&e),
    }
}

/// Compress command implementation
pub fn compress(
    context: &Context,
    input: &Path,
    output: &Path,
    filters: &[String],
    options: Option<String>,
) -> ExitCode {
    let args = WriteArgs {
        filters: filters.to_vec(),
        options,
        password: None,
        ask_password: false,
    };
    let result = write_options(context, Format::Raw, args).and_then(|options| {
        let mut source: Box<dyn Read> = if input == Path::new("-") {
            Box::new(io::stdin().lock())
        } else {
            Box::new(File::open(input)?)
        };
        let mut writer = ArchiveWriter::compressed_file(output, options)?;
        writer.open()?;
        io::copy(&mut source, &mut writer).map_err(unwrap_io)?;
        writer.close()?;
        Ok(writer.bytes_written())
    });
    match result {
        Ok(bytes) => {
            if !context.quiet && context.format == OutputFormat::Human {
                eprintln!("Compressed {bytes} bytes into '{}'", output.display());
            }
            ExitCode::Success
        }
        Err(e) => fail(&e),
    }
}

/// Codes command implementation
pub fn codes(context: &Context) -> ExitCode {
    let formatter = create_formatter(context.format);
    print!("{}", formatter.format_codes(&filter_table(), &format_table()));
    ExitCode::Success
}
