//! Read-only access to PMTiles v3 archives.

mod directory;
mod header;
mod source;
mod tile_id;

pub use directory::{Entry, parse_entries, serialize_entries};
pub use header::{ByteRange, Compression, Header};
pub use source::PMTilesTileSource;
pub use tile_id::{coord_to_tile_id, tile_id_to_coord};
