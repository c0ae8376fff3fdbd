use crate::engine::StreamInfo;

/// Presentation-layer observer. Fire-and-forget: no acknowledgment, no
/// return value; each notification fires once per stream per session and
/// carries an immutable snapshot.
pub trait CallListener: Send + Sync {
    /// The local capture stream is ready to render.
    fn local_stream_added(&self, stream: &StreamInfo);

    /// The remote party's stream arrived.
    fn remote_stream_added(&self, stream: &StreamInfo);
}
