/// Asset discovery for published notes.
///
/// Two producers feed the upload queue during a publish pass:
/// - `media`: local `img`/`video`/`audio` sources in the note body
/// - `css`: `url(...)` references inside the page stylesheet
///
/// Media may be recompressed on the way in (`compress`).
///
/// Each producer swaps the original reference for a queue placeholder; the
/// pipeline substitutes the hosted URL once the queue has drained.
pub mod compress;
pub mod css;
pub mod data_uri;
pub mod filetype;
pub mod media;
pub mod source;

pub use compress::ImageCompressor;
pub use css::{extract_css_assets, split_css_into_chunks};
pub use media::{extract_media_assets, MediaScan};
pub use source::{AssetSource, FetchedAsset, FsAssetSource};
