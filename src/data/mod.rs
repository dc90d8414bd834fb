//! Data model and store access, one module per entity. Each entity keeps its
//! serialized models in `mod.rs` and its request data plus the `Db` extension
//! trait in `db.rs`.

pub mod class;
pub mod department;
pub mod enrollment;
pub mod subject;
pub mod user;
