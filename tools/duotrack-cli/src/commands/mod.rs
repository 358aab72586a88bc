pub mod check;
pub mod info;
pub mod merge;
pub mod record;
