//! Delivery callback invoked once per received frame

use crate::transports::EndpointId;
use types::Envelope;

/// Consumer of decoded frames, run on the poll thread
///
/// Closures of the form `FnMut(EndpointId, Envelope) + Send` implement this
/// directly. To forward from inside a handler, capture a
/// [`ServerSender`](crate::ServerSender).
pub trait DeliveryHandler: Send {
    fn deliver(&mut self, endpoint: EndpointId, envelope: Envelope);
}

impl<F> DeliveryHandler for F
where
    F: FnMut(EndpointId, Envelope) + Send,
{
    fn deliver(&mut self, endpoint: EndpointId, envelope: Envelope) {
        self(endpoint, envelope)
    }
}
