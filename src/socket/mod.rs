pub mod events;
pub mod fallback_poller;
pub mod health;
pub mod price_stream;

pub use events::{EventBus, FeedHealth, HealthEvent, PriceEvent, PriceSample, PriceSource};
pub use fallback_poller::{FallbackPoller, PriceFetcher};
pub use price_stream::{PriceStream, PriceStreamConfig};
