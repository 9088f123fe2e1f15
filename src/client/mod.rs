pub mod blocking;
pub mod nonblocking;
pub mod settings;
pub mod tls;
pub mod transport;

pub use blocking::{Blocking, Client};
pub use nonblocking::{Async, AsyncClient};
pub use settings::{Charset, ClientSettings, MessageConstraints, Timeouts, TrustPolicy};
pub use transport::{AsyncTransport, BlockingTransport};
