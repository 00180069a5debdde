// src/domain/mod.rs

//! Internal domain abstractions shared by the context, publisher, and
//! subscriber layers. Not a user-facing API surface on its own; `lib.rs`
//! re-exports the pieces callers need.

mod transport;

pub use transport::{
    //
    ChannelId,
    Connection,
    ConnectionFactory,
    ConnectionFactoryPtr,
    ConnectionPtr,
    Consumer,
    ConsumerPtr,
    Payload,
    Producer,
    ProducerPtr,
    Session,
    SessionPtr,
};
