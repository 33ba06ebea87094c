pub mod backend;
pub mod protocol;

pub use backend::MdsvexBackend;
