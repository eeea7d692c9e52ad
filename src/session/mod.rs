mod container;
mod token;

pub use container::SessionContainer;
pub use token::SessionToken;
pub use token::SessionTokenParseError;
