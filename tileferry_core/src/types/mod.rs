mod tile;
pub use tile::Tile;

mod tile_coord;
pub use tile_coord::TileCoord;
