pub mod config;
pub mod model;
pub mod pipeline;
pub mod source;
pub mod store;

pub mod util {
    pub mod env;
}
