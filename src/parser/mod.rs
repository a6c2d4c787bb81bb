pub mod core;
pub mod imports;
pub mod skeleton;

// Реэкспорт публичного API
pub use self::core::SourceUnit;
pub use imports::{module_imports, parse_import};
pub use skeleton::{outline, skeletonize};
