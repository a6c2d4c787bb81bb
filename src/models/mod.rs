pub mod unit;

pub use unit::{
    ClassUnit, Decorator, ImportKind, ImportStatement, ImportedName, ProgramUnit, Skeleton,
    UnitKind,
};
