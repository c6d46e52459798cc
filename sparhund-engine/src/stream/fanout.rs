//! Dispatches stream callbacks to the conversation recorder and every
//! stream decoder.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Direction, StreamContext, StreamHandler, TcpConversationRecorder};
use crate::decoder::{CustomDecoder, DecodeEvent};
use crate::emit::RecordEmitter;

pub struct StreamFanout {
    recorder: Option<Arc<TcpConversationRecorder>>,
    decoders: Vec<Arc<CustomDecoder>>,
    emitter: Arc<RecordEmitter>,
}

impl StreamFanout {
    pub fn new(
        recorder: Option<Arc<TcpConversationRecorder>>,
        decoders: Vec<Arc<CustomDecoder>>,
        emitter: Arc<RecordEmitter>,
    ) -> Self {
        Self {
            recorder,
            decoders,
            emitter,
        }
    }

    fn dispatch(&self, event: DecodeEvent<'_>) {
        for decoder in &self.decoders {
            self.emitter.emit_all(decoder.decode(&event));
        }
    }
}

impl StreamHandler for StreamFanout {
    fn deliver(
        &self,
        ctx: &StreamContext,
        direction: Direction,
        data: &[u8],
        timestamp: DateTime<Utc>,
    ) {
        if let Some(recorder) = &self.recorder {
            recorder.deliver(ctx, direction, data, timestamp);
        }
        self.dispatch(DecodeEvent::StreamData {
            ctx,
            direction,
            data,
            timestamp,
        });
    }

    fn close(&self, ctx: &StreamContext) {
        self.dispatch(DecodeEvent::StreamClosed { ctx });
        if let Some(recorder) = &self.recorder {
            recorder.close(ctx);
        }
    }
}
