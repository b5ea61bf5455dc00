pub mod layout;
pub mod config;
pub mod table;
pub mod bitmap;
pub mod validate;
pub mod container;
pub mod repack;
pub mod optimize;
pub mod batch;
pub mod logging;

pub use layout::{ArchiveLayout, AssetId, AssetKind, TableSpec};
pub use config::Config;
pub use table::{AssetTable, TableRecord, TableSet};
pub use bitmap::{decode, decode_with, encode, encode_image, BitmapConfig, BitmapError, BitmapHeader, DecodedBitmap, HeaderBuilder, SizePolicy};
pub use validate::{validate, ValidationOutcome, ValidationReport};
pub use container::{extract, AssetFormat, ContainerError, ContainerReader};
pub use repack::{assign_offsets, check_contiguity, RepackError, RepackOptions, RepackSummary, Repacker, Substitute, SubstitutionSet};
pub use batch::{BatchReport, Categorize};
