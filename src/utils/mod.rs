pub mod http;
pub mod keychain;
pub mod logging;
pub mod normalize;
pub mod text;
