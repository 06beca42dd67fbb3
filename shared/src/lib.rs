pub mod annotation;
pub mod colors;
pub mod country;
pub mod datasets;
pub mod export;
pub mod geom;
pub mod overlay;
pub mod projection;
pub mod territory;

pub use annotation::{AnnotationFields, PlayerScope, TEXT_FIELD_PRIORITY, TextField};
pub use colors::{CapitalColorMode, CapitalColorModes, CountryColorTable, Rgb};
pub use country::*;
pub use datasets::{DatasetItem, SortDirection, SortField, dataset_items, filter_and_sort};
pub use export::{
    ExportAnchor, ExportError, ExportMode, ExportOptions, ExportPlan, ExportedImage,
    RegionRenderer, RenderRequest, export_overlay_image,
};
pub use geom::{PixelPoint, PixelRect};
pub use overlay::{OverlayGroup, OverlayKey, OverlaySet, OverlayShape, build_overlays};
pub use projection::CoordinateProjector;
pub use territory::*;
