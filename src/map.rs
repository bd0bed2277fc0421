/// Sector map visualization

use crate::format::constants::SECTORS_PER_TRACK;
use crate::image::{DiskImage, DiskSide};
use std::fmt::Write as _;
use std::ops::Deref;

/// ANSI color codes for sector map
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_WHITE: &str = "\x1b[97m";
    pub const DARK_WHITE: &str = "\x1b[37m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
}

const FILE_SYMBOLS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTU";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Owner {
    Catalog,
    File(usize),
    Overlap,
    Free,
    Outside,
}

fn owners<I: Deref<Target = DiskImage>>(side: &DiskSide<I>) -> Vec<Owner> {
    let physical = side.physical_sectors() as usize;
    let limit = (side.number_of_sectors() as usize).min(physical);
    let mut owners: Vec<Owner> = (0..physical)
        .map(|sector| match sector {
            0 | 1 => Owner::Catalog,
            s if s < limit => Owner::Free,
            _ => Owner::Outside,
        })
        .collect();

    for entry in side.files() {
        let end = (entry.end_sector() as usize).min(physical);
        for owner in &mut owners[(entry.start_sector as usize).min(end)..end] {
            *owner = match *owner {
                Owner::Free | Owner::Outside => Owner::File(entry.index),
                _ => Owner::Overlap,
            };
        }
    }
    owners
}

fn plain_symbol(owner: Owner) -> char {
    match owner {
        Owner::Catalog => 'C',
        Owner::File(index) => FILE_SYMBOLS.get(index).map_or('?', |&b| b as char),
        Owner::Overlap => '!',
        Owner::Free => '.',
        Owner::Outside => ' ',
    }
}

fn colored_symbol(owner: Owner) -> String {
    const BLOCK_NO_DATA: &str = "\u{2591}"; // ░ - Light shade (free)
    const BLOCK_HAS_DATA: &str = "\u{2593}"; // ▓ - Dark shade (in-use)
    let (color, block) = match owner {
        Owner::Catalog => (colors::BRIGHT_YELLOW, BLOCK_HAS_DATA),
        Owner::File(_) => (colors::BRIGHT_WHITE, BLOCK_HAS_DATA),
        Owner::Overlap => (colors::BRIGHT_RED, BLOCK_HAS_DATA),
        Owner::Free => (colors::DARK_WHITE, BLOCK_NO_DATA),
        Owner::Outside => return " ".to_string(),
    };
    format!("{}{}{}", color, block, colors::RESET)
}

/// Render the allocation of a side, one column per track
///
/// Rows are sector positions with sector 0 at the bottom. Without
/// color, catalog sectors show as `C`, file sectors by catalog index
/// (`0`-`9` then `A`-`U`), overlaps as `!` and free sectors as `.`.
pub fn sector_map<I: Deref<Target = DiskImage>>(side: &DiskSide<I>, colored: bool) -> String {
    let owners = owners(side);
    let tracks = owners.len() / SECTORS_PER_TRACK;
    let mut out = String::new();

    let _ = writeln!(out, "=== Sector Map (Drive {}) ===", side.drive());
    if colored {
        let _ = writeln!(
            out,
            "Legend: {}Catalog{} {}In Use{} {}Free{} {}Overlap{}",
            colors::BRIGHT_YELLOW,
            colors::RESET,
            colors::BRIGHT_WHITE,
            colors::RESET,
            colors::DARK_WHITE,
            colors::RESET,
            colors::BRIGHT_RED,
            colors::RESET
        );
    } else {
        let _ = writeln!(out, "Legend: C catalog, 0-U file by index, . free, ! overlap");
    }
    out.push('\n');

    for sector in (0..SECTORS_PER_TRACK).rev() {
        let _ = write!(out, "{:>2} ", sector);
        for track in 0..tracks {
            let owner = owners[track * SECTORS_PER_TRACK + sector];
            if colored {
                out.push_str(&colored_symbol(owner));
            } else {
                out.push(plain_symbol(owner));
            }
        }
        out.push('\n');
    }

    // Track numbers every five columns
    out.push_str("   ");
    let mut column = 0;
    while column < tracks {
        if column % 5 == 0 {
            let label = column.to_string();
            let width = label.len().min(tracks - column);
            out.push_str(&label[..width]);
            column += width;
        } else {
            out.push(' ');
            column += 1;
        }
    }
    out.push('\n');
    out
}

/// Print the sector map of one head of an image
pub fn draw_sector_map(image: &DiskImage, head: u8) {
    match image.side(head) {
        Ok(side) => print!("{}", sector_map(&side, true)),
        Err(err) => println!("{}", err),
    }
}
