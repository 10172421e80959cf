pub mod chapter;
pub mod manga;
pub mod paging;

pub use paging::{Page, Paging};
