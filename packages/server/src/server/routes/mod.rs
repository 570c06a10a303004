// HTTP routes
pub mod export;
pub mod health;
pub mod jobs;
pub mod stream;
pub mod urls;

pub use export::*;
pub use health::*;
pub use jobs::*;
pub use stream::*;
pub use urls::*;
