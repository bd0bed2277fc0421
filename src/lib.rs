/*!
# dfsmanager

A Rust library for reading and writing BBC Micro Acorn DFS disk images
(`.ssd`/`.dsd`) and MMB multi-disk containers.

## Features

- 40 and 80 track, single and double sided, interleaved or linear images
- Bit-exact catalog decoding and encoding, 31 files per side
- Allocation that keeps the catalog ordering and compacts when fragmented
- Catalog validation with configurable warning reporting
- MMB containers with slots opened as ordinary images sharing one file
- SHA-1/SHA-256 digests of files, sides and images

## Quick Start

```rust,no_run
use dfsmanager::{AddOptions, DiskImage, ImageOptions, OpenMode};

// Create a new 80-track single sided image
let mut image = ImageOptions::new()
    .write(true)
    .mode(OpenMode::New)
    .open("games.ssd")?;

// Add a file with a load address
image.add_file("$.HELLO", b"PRINT \"HELLO\"", &AddOptions::new().load(0x1900))?;

// List the catalog
println!("{}", image.side(0)?.cat());

// Read it back
let data = image.read_file("HELLO")?;

// Save and close
image.close()?;

// Open a slot of an MMB container read-only
let slot = ImageOptions::new().index(12).open("BEEB.MMB")?;
for entry in slot.files() {
    println!("{}", entry);
}
# Ok::<(), dfsmanager::DfsError>(())
```

## Modules

- `format`: constants, geometry and sector addressing
- `catalog`: catalog sector and entry record encoding
- `image`: `DiskImage`, `DiskSide` and sector ranges
- `io`: reading and writing image files
- `mmb`: MMB containers
- `digest`: content digests
- `warn`: validation warnings and sinks
- `error`: Error types and Result alias
*/

#![warn(missing_docs)]

/// Catalog sector and entry record encoding
pub mod catalog;
/// Content digests of files, sides and images
pub mod digest;
/// Error types and Result alias
pub mod error;
/// DFS format constants, geometry and option types
pub mod format;
/// Core image data structures (DiskImage, DiskSide, Sectors)
pub mod image;
/// I/O operations for reading and writing image files
pub mod io;
/// Sector map visualization
pub mod map;
/// MMB multi-disk containers
pub mod mmb;
/// Validation warnings and sinks
pub mod warn;

// Re-export common types
pub use catalog::{Catalog, FileEntry, ParsedName};
pub use digest::{DigestAlgorithm, DigestMode};
pub use error::{DfsError, Result};
pub use format::{BootOption, Geometry, GeometryHints, OpenMode, SizeOption};
pub use image::{
    hexdump, AddOptions, DiskImage, DiskSide, FreeBlock, ImageOptions, Sectors,
};
pub use mmb::{MmbEntry, MmbFile, MmbStatus};
pub use warn::{LogSink, Silent, WarnMode, Warning, WarningKind, WarningSink};
