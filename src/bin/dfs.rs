/// Interactive DFS console application

use dfsmanager::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};

/// Command completer for the REPL
struct CommandCompleter {
    commands: Vec<&'static str>,
}

impl CommandCompleter {
    fn new() -> Self {
        Self {
            commands: vec![
                "cat",
                "close",
                "compact",
                "copy",
                "create",
                "delete",
                "digest",
                "exit",
                "export",
                "help",
                "import",
                "info",
                "lock",
                "map",
                "mmb-drecat",
                "mmb-list",
                "new",
                "open",
                "opt",
                "quit",
                "read",
                "rename",
                "save",
                "title",
                "unlock",
                "validate",
            ],
        }
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only complete the first word (command name)
        let line_to_cursor = &line[..pos];
        if line_to_cursor.contains(' ') {
            return Ok((pos, vec![]));
        }

        let prefix = line_to_cursor.to_lowercase();
        let matches: Vec<Pair> = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(&prefix))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}
impl Validator for CommandCompleter {}
impl Helper for CommandCompleter {}

/// Get the path to the history file
fn history_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|mut p| {
        p.push(".dfsmanager_history");
        p
    })
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    println!("=== DFSManager ===");
    println!("Interactive console for BBC Micro DFS disk images and MMB containers.");
    println!("Type 'help' for available commands\n");

    let mut rl = Editor::new().expect("Failed to create editor");
    rl.set_helper(Some(CommandCompleter::new()));

    if let Some(history_path) = history_path() {
        let _ = rl.load_history(&history_path);
    }

    let mut image: Option<DiskImage> = None;

    loop {
        let input = match rl.readline("> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                if let Some(history_path) = history_path() {
                    let _ = rl.save_history(&history_path);
                }
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let parts = parse_command_line(input);
        if parts.is_empty() {
            continue;
        }
        let command = parts[0].to_lowercase();
        let args = &parts[1..];

        let result = match command.as_str() {
            "help" => {
                print_help();
                Ok(())
            }
            "quit" | "exit" => {
                if let Some(history_path) = history_path() {
                    let _ = rl.save_history(&history_path);
                }
                if image.as_ref().is_some_and(DiskImage::is_modified) {
                    println!("Discarding unsaved changes.");
                }
                println!("Goodbye!");
                break;
            }
            "open" => open_image(args).map(|img| {
                println!(
                    "Opened {}{}",
                    args[0],
                    if img.is_writable() { "" } else { " (read-only)" }
                );
                image = Some(img);
            }),
            "create" => create_image(args).map(|img| {
                println!("Created {}", args[0]);
                image = Some(img);
            }),
            "new" => new_image(args).map(|img| {
                println!("Created in-memory image; use 'save <path>' to write it");
                image = Some(img);
            }),
            "mmb-list" => mmb_list(args),
            "mmb-drecat" => mmb_drecat(args),
            "close" => match image.take() {
                Some(img) => img.close().map(|_| println!("Closed.")),
                None => Err(no_image()),
            },
            _ => match image.as_mut() {
                Some(img) => run_image_command(img, &command, args),
                None if is_image_command(&command) => Err(no_image()),
                None => {
                    println!("Unknown command: {}. Type 'help' for available commands.", command);
                    Ok(())
                }
            },
        };

        if let Err(e) = result {
            println!("Error: {}", e);
        }
    }
}

fn no_image() -> DfsError {
    DfsError::invalid_value("no image loaded; use 'open <path>', 'create' or 'new' first")
}

fn usage(text: &str) -> DfsError {
    DfsError::invalid_value(format!("usage: {}", text))
}

fn is_image_command(command: &str) -> bool {
    matches!(
        command,
        "info"
            | "cat"
            | "map"
            | "read"
            | "export"
            | "import"
            | "delete"
            | "rename"
            | "copy"
            | "lock"
            | "unlock"
            | "compact"
            | "title"
            | "opt"
            | "validate"
            | "digest"
            | "save"
    )
}

fn open_image(args: &[String]) -> Result<DiskImage> {
    let path = args.first().ok_or_else(|| usage("open <path> [slot] [rw]"))?;
    let mut options = ImageOptions::new().mode(OpenMode::Existing);
    for arg in &args[1..] {
        if arg.eq_ignore_ascii_case("rw") {
            options = options.write(true);
        } else {
            let slot = arg
                .parse()
                .map_err(|_| DfsError::invalid_value(format!("bad slot '{}'", arg)))?;
            options = options.index(slot);
        }
    }
    options.open(path)
}

fn parse_tracks(arg: Option<&String>) -> Result<u8> {
    match arg.map(String::as_str) {
        None | Some("80") => Ok(80),
        Some("40") => Ok(40),
        Some(other) => Err(DfsError::invalid_value(format!("bad track count '{}'", other))),
    }
}

fn create_image(args: &[String]) -> Result<DiskImage> {
    let path = args.first().ok_or_else(|| usage("create <path.ssd|path.dsd> [40|80]"))?;
    ImageOptions::new()
        .write(true)
        .mode(OpenMode::New)
        .tracks(parse_tracks(args.get(1))?)
        .open(path)
}

fn new_image(args: &[String]) -> Result<DiskImage> {
    let heads = match args.first().map(String::as_str) {
        None | Some("ssd") => 1,
        Some("dsd") => 2,
        Some(other) => return Err(DfsError::invalid_value(format!("bad layout '{}'", other))),
    };
    Ok(DiskImage::new(Geometry::new(heads, parse_tracks(args.get(1))?, false)?))
}

fn mmb_list(args: &[String]) -> Result<()> {
    let path = args.first().ok_or_else(|| usage("mmb-list <path.mmb>"))?;
    let mmb = MmbFile::open(path, false)?;
    let onboot = mmb.onboot();
    println!(
        "Onboot: 0={} 1={} 2={} 3={}",
        onboot[0], onboot[1], onboot[2], onboot[3]
    );
    for entry in mmb.entries() {
        if entry.status != MmbStatus::Uninitialized {
            println!("{}", entry);
        }
    }
    Ok(())
}

fn mmb_drecat(args: &[String]) -> Result<()> {
    let path = args.first().ok_or_else(|| usage("mmb-drecat <path.mmb>"))?;
    let mmb = MmbFile::open(path, true)?;
    let updated = mmb.drecat()?;
    mmb.close()?;
    println!("Updated {} titles", updated);
    Ok(())
}

/// Parse a drive number (0 or 2) into a head
fn parse_drive(arg: &str) -> Result<u8> {
    match arg.trim_start_matches(':') {
        "0" => Ok(0),
        "2" => Ok(1),
        other => Err(DfsError::invalid_value(format!("bad drive '{}'", other))),
    }
}

/// Parse a hex address, with optional `&` or `0x` prefix
fn parse_address(arg: &str) -> Result<u32> {
    let digits = arg
        .strip_prefix('&')
        .or_else(|| arg.strip_prefix("0x"))
        .or_else(|| arg.strip_prefix("0X"))
        .unwrap_or(arg);
    u32::from_str_radix(digits, 16)
        .map_err(|_| DfsError::invalid_value(format!("bad address '{}'", arg)))
}

fn heads_for(image: &DiskImage, arg: Option<&String>) -> Result<Vec<u8>> {
    match arg {
        Some(drive) => Ok(vec![parse_drive(drive)?]),
        None => image.default_sides(None),
    }
}

fn run_image_command(image: &mut DiskImage, command: &str, args: &[String]) -> Result<()> {
    match command {
        "info" => {
            print_info(image);
            Ok(())
        }
        "cat" => {
            for head in heads_for(image, args.first())? {
                println!("{}", image.side(head)?.cat());
            }
            Ok(())
        }
        "map" => {
            let head = args.first().map(|d| parse_drive(d)).transpose()?.unwrap_or(0);
            dfsmanager::map::draw_sector_map(image, head);
            Ok(())
        }
        "read" => {
            let name = args.first().ok_or_else(|| usage("read <name>"))?;
            let entry = image.get_entry(name)?;
            println!("{}", entry);
            print!("{}", hexdump(&image.read_file(name)?));
            Ok(())
        }
        "export" => {
            let name = args.first().ok_or_else(|| usage("export <name> [path]"))?;
            let entry = image.get_entry(name)?;
            let path = args.get(1).cloned().unwrap_or_else(|| entry.filename.clone());
            let data = image.read_file(name)?;
            std::fs::write(&path, &data)?;
            println!("Exported {} ({} bytes) to {}", entry.fullname(), data.len(), path);
            Ok(())
        }
        "import" => {
            let path = args.first().ok_or_else(|| usage("import <path> <name> [load] [exec]"))?;
            let name = args.get(1).ok_or_else(|| usage("import <path> <name> [load] [exec]"))?;
            let mut options = AddOptions::new().replace(true);
            if let Some(load) = args.get(2) {
                options = options.load(parse_address(load)?);
            }
            if let Some(exec) = args.get(3) {
                options = options.exec(parse_address(exec)?);
            }
            let data = std::fs::read(path)?;
            let entry = image.add_file(name, &data, &options)?;
            println!("{}", entry);
            Ok(())
        }
        "delete" => {
            let name = args.first().ok_or_else(|| usage("delete <name>"))?;
            let entry = image.delete(name, false)?;
            println!("Deleted {}", entry.drive_name());
            Ok(())
        }
        "rename" | "copy" => {
            let (from, to) = match args {
                [from, to, ..] => (from, to),
                _ => return Err(usage(&format!("{} <from> <to>", command))),
            };
            let entry = if command == "rename" {
                image.rename(from, to, &AddOptions::new())?
            } else {
                image.copy(from, to, &AddOptions::new())?
            };
            println!("{}", entry);
            Ok(())
        }
        "lock" | "unlock" => {
            let name = args.first().ok_or_else(|| usage(&format!("{} <name>", command)))?;
            let entry = if command == "lock" {
                image.lock(name)?
            } else {
                image.unlock(name)?
            };
            println!("{}", entry);
            Ok(())
        }
        "compact" => {
            let head = args.first().map(|d| parse_drive(d)).transpose()?;
            let moved = image.compact(head)?;
            println!("{}", if moved { "Compacted." } else { "Nothing to move." });
            Ok(())
        }
        "title" => {
            let (drive, title) = match args {
                [drive, title, ..] => (drive, title),
                _ => return Err(usage("title <drive> <title>")),
            };
            image.side_mut(parse_drive(drive)?)?.set_title(title)
        }
        "opt" => {
            let (drive, option) = match args {
                [drive, option, ..] => (drive, option),
                _ => return Err(usage("opt <drive> <off|load|run|exec>")),
            };
            image
                .side_mut(parse_drive(drive)?)?
                .set_boot_option(BootOption::parse(option)?)
        }
        "validate" => {
            let mut warnings: Vec<Warning> = Vec::new();
            let valid = image.validate(&mut warnings);
            for warning in &warnings {
                println!("  {}", warning);
            }
            println!("{}", if valid { "Valid." } else { "Invalid: modification disabled." });
            Ok(())
        }
        "digest" => {
            let mode = args
                .first()
                .map(|m| DigestMode::parse(m))
                .transpose()?
                .unwrap_or_default();
            let algorithm = args
                .get(1)
                .map(|a| DigestAlgorithm::parse(a))
                .transpose()?
                .unwrap_or_default();
            for side in image.sides() {
                println!("Drive {}: {}", side.drive(), side.digest(mode, algorithm)?);
            }
            Ok(())
        }
        "save" => {
            match args.first() {
                Some(path) => image.save_as(path)?,
                None => image.save()?,
            }
            println!("Saved.");
            Ok(())
        }
        _ => {
            println!("Unknown command: {}. Type 'help' for available commands.", command);
            Ok(())
        }
    }
}

/// Parse command line input, respecting quoted strings
fn parse_command_line(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
            }
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(current.clone());
                    current.clear();
                }
            }
            _ => {
                current.push(ch);
            }
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn print_help() {
    println!("Available commands:");
    println!("  open <path> [slot] [rw]        - Open an image, or a slot of an .mmb container");
    println!("  create <path> [40|80]          - Create a new .ssd/.dsd file");
    println!("  new [ssd|dsd] [40|80]          - Create an image in memory");
    println!("  info                           - Show image information");
    println!("  cat [drive]                    - Catalog listing (drive 0 or 2)");
    println!("  map [drive]                    - Visual sector map");
    println!("  read <name>                    - Hex dump a file");
    println!("  export <name> [path]           - Write a file to the host filesystem");
    println!("  import <path> <name> [ld] [ex] - Add a host file (addresses in hex)");
    println!("  delete <name>                  - Delete a file");
    println!("  rename <from> <to>             - Rename a file (':2.' prefix moves it)");
    println!("  copy <from> <to>               - Copy a file");
    println!("  lock <name> / unlock <name>    - Change the locked flag");
    println!("  compact [drive]                - Move files together");
    println!("  title <drive> <title>          - Set the disk title");
    println!("  opt <drive> <off|load|run|exec> - Set the boot option");
    println!("  validate                       - Check the catalogs");
    println!("  digest [all|used|file|data] [sha1|sha256] - Side digests");
    println!("  save [path]                    - Save the image (to a new path if given)");
    println!("  close                          - Save changes and close the image");
    println!("  mmb-list <path>                - List the slots of an MMB container");
    println!("  mmb-drecat <path>              - Refresh MMB titles from slot catalogs");
    println!("  help                           - Show this help");
    println!("  quit, exit                     - Exit without saving");
}

fn print_info(image: &DiskImage) {
    if let Some(path) = image.path() {
        println!("Filename: {}", path.display());
    }
    if let Some(slot) = image.slot() {
        println!("MMB slot: {}{}", slot, if image.is_initialized() { "" } else { " (uninitialised)" });
    }
    let geometry = image.geometry();
    println!("Sides: {}", geometry.heads);
    println!("Tracks per side: {}", geometry.tracks);
    if geometry.heads == 2 {
        println!("Layout: {}", if geometry.linear { "linear" } else { "interleaved" });
    }
    println!("Total capacity: {} KB", geometry.total_size() / 1024);
    println!("Minimum size: {} bytes", image.min_size());
    for side in image.sides() {
        println!(
            "Drive {}: \"{}\" {} files, {} of {} sectors free{}",
            side.drive(),
            side.title(),
            side.number_of_files(),
            side.free_sectors(),
            side.number_of_sectors(),
            if side.is_valid() { "" } else { " (invalid)" }
        );
    }
    println!(
        "Access: {}{}",
        if image.is_writable() { "read/write" } else { "read-only" },
        if image.is_catalog_only() { ", catalog only" } else { "" }
    );
    println!("Changed: {}", if image.is_modified() { "Yes" } else { "No" });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_line_quotes() {
        assert_eq!(
            parse_command_line("open \"my disk.ssd\"  rw"),
            vec!["open", "my disk.ssd", "rw"]
        );
    }

    #[test]
    fn test_parse_drive_and_address() {
        assert_eq!(parse_drive("2").unwrap(), 1);
        assert_eq!(parse_drive(":0").unwrap(), 0);
        assert!(parse_drive("1").is_err());
        assert_eq!(parse_address("&1900").unwrap(), 0x1900);
        assert_eq!(parse_address("0xFFFF1900").unwrap(), 0xFFFF_1900);
        assert!(parse_address("zz").is_err());
    }
}
