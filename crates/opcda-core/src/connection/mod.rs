//! Callback-subscription lifecycle against connectable remote sources.

mod point;

pub use point::{
    CallbackSink, CallbackSubscription, ConnectableSource, ConnectionPoint, InterfaceId,
    RegistrationToken, SubscriptionError,
};
