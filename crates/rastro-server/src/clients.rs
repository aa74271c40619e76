//! HTTP clients for the external collaborators: reverse geocoding, cell
//! tower geolocation, the SPOT Trace feed and push topic publishing.
//!
//! None of these clients impose a timeout of their own: a stuck collaborator
//! leaves only the initiating task pending.

pub mod cell;
pub mod geocode;
pub mod push;
pub mod spot_feed;

pub use cell::UnwiredCellLocator;
pub use geocode::GoogleGeocoder;
pub use push::FcmPublisher;
pub use spot_feed::SpotFeedClient;
