//! SeaORM entity models

mod paper;

pub use paper::{
    Entity as PaperEntity,
    Model as Paper,
    Column as PaperColumn,
    FieldValues,
};
