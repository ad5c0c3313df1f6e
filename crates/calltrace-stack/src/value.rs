//! Lazily decoded parameter and return-value blobs.
//!
//! The engine keeps captured blobs opaque. A [`ValueDecoder`] turns them into
//! something useful, and [`DecodedValues`] memoizes the result per frame.

use calltrace_types::MethodInfo;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::{FrameArena, FrameId, FrameKind};

/// Decodes captured value blobs for one method.
pub trait ValueDecoder {
    type Value;
    type Error;

    fn decode_parameters(
        &self,
        method: &MethodInfo,
        blob: &[u8],
    ) -> Result<Self::Value, Self::Error>;

    fn decode_return_value(
        &self,
        method: &MethodInfo,
        blob: &[u8],
    ) -> Result<Self::Value, Self::Error>;
}

#[derive(Clone, Copy)]
enum Slot {
    Parameters,
    ReturnValue,
}

/// Side table of decoded values keyed by frame.
///
/// Entries are computed on first access and live until invalidated. Failed
/// decodes are not cached.
#[derive(Debug, Clone)]
pub struct DecodedValues<V> {
    parameters: BTreeMap<FrameId, V>,
    return_values: BTreeMap<FrameId, V>,
}

impl<V> Default for DecodedValues<V> {
    fn default() -> Self {
        Self {
            parameters: BTreeMap::new(),
            return_values: BTreeMap::new(),
        }
    }
}

impl<V> DecodedValues<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Ok(None)` when the frame was not entered through a detailed event.
    pub fn parameters<D>(
        &mut self,
        arena: &FrameArena,
        frame: FrameId,
        decoder: &D,
    ) -> Result<Option<&V>, D::Error>
    where
        D: ValueDecoder<Value = V>,
    {
        self.decode(arena, frame, decoder, Slot::Parameters)
    }

    /// `Ok(None)` when no return value was captured (non-detailed frame,
    /// failed call, or still on the stack).
    pub fn return_value<D>(
        &mut self,
        arena: &FrameArena,
        frame: FrameId,
        decoder: &D,
    ) -> Result<Option<&V>, D::Error>
    where
        D: ValueDecoder<Value = V>,
    {
        self.decode(arena, frame, decoder, Slot::ReturnValue)
    }

    fn decode<D>(
        &mut self,
        arena: &FrameArena,
        frame: FrameId,
        decoder: &D,
        slot: Slot,
    ) -> Result<Option<&V>, D::Error>
    where
        D: ValueDecoder<Value = V>,
    {
        let Some(FrameKind::MethodDetailed(detailed)) = arena.get(frame).map(|f| f.kind()) else {
            return Ok(None);
        };
        let (cache, blob) = match slot {
            Slot::Parameters => (&mut self.parameters, Some(detailed.parameters.as_slice())),
            Slot::ReturnValue => (&mut self.return_values, detailed.return_value.as_deref()),
        };
        let Some(blob) = blob else {
            return Ok(None);
        };

        match cache.entry(frame) {
            Entry::Occupied(entry) => Ok(Some(entry.into_mut())),
            Entry::Vacant(entry) => {
                let value = match slot {
                    Slot::Parameters => decoder.decode_parameters(&detailed.method, blob)?,
                    Slot::ReturnValue => decoder.decode_return_value(&detailed.method, blob)?,
                };
                Ok(Some(entry.insert(value)))
            }
        }
    }

    /// Forgets both decoded values of one frame.
    pub fn invalidate(&mut self, frame: FrameId) {
        self.parameters.remove(&frame);
        self.return_values.remove(&frame);
    }

    pub fn clear(&mut self) {
        self.parameters.clear();
        self.return_values.clear();
    }

    pub fn len(&self) -> usize {
        self.parameters.len() + self.return_values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.return_values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MethodTable, SessionConfig, ThreadStack};
    use calltrace_types::{FunctionId, SeqNo, StatusCode, ThreadId};
    use std::cell::Cell;

    /// Sums the bytes of a blob and counts how often it was asked to.
    #[derive(Default)]
    struct SumDecoder {
        calls: Cell<usize>,
    }

    impl ValueDecoder for SumDecoder {
        type Value = u32;
        type Error = String;

        fn decode_parameters(&self, _: &MethodInfo, blob: &[u8]) -> Result<u32, String> {
            self.calls.set(self.calls.get() + 1);
            if blob.is_empty() {
                return Err("empty blob".to_owned());
            }
            Ok(blob.iter().map(|&b| u32::from(b)).sum())
        }

        fn decode_return_value(&self, method: &MethodInfo, blob: &[u8]) -> Result<u32, String> {
            self.decode_parameters(method, blob).map(|sum| sum * 10)
        }
    }

    fn detailed_stack() -> (ThreadStack, FrameId, FrameId) {
        let methods = MethodTable::new();
        let mut stack = ThreadStack::new(ThreadId(1), None, SessionConfig::default());
        let detailed = stack
            .call_enter_detailed(SeqNo(1), FunctionId(1), vec![1, 2, 3], &methods)
            .unwrap();
        stack
            .leave_detailed(SeqNo(2), FunctionId(1), StatusCode::OK, &[4])
            .unwrap();
        let plain = stack.call_enter(SeqNo(3), FunctionId(2), &methods).unwrap();
        (stack, detailed, plain)
    }

    #[test]
    fn decodes_once_and_memoizes() {
        let (stack, frame, _) = detailed_stack();
        let decoder = SumDecoder::default();
        let mut values = DecodedValues::new();

        assert_eq!(values.parameters(stack.frames(), frame, &decoder), Ok(Some(&6)));
        assert_eq!(values.parameters(stack.frames(), frame, &decoder), Ok(Some(&6)));
        assert_eq!(values.return_value(stack.frames(), frame, &decoder), Ok(Some(&40)));
        assert_eq!(decoder.calls.get(), 2);
        assert_eq!(values.len(), 2);

        values.invalidate(frame);
        assert!(values.is_empty());
        assert_eq!(values.parameters(stack.frames(), frame, &decoder), Ok(Some(&6)));
        assert_eq!(decoder.calls.get(), 3);
    }

    #[test]
    fn non_detailed_frames_have_no_values() {
        let (stack, _, plain) = detailed_stack();
        let decoder = SumDecoder::default();
        let mut values = DecodedValues::new();
        assert_eq!(values.parameters(stack.frames(), plain, &decoder), Ok(None));
        assert_eq!(values.return_value(stack.frames(), plain, &decoder), Ok(None));
        assert_eq!(decoder.calls.get(), 0);
    }

    #[test]
    fn decode_errors_are_not_cached() {
        let methods = MethodTable::new();
        let mut stack = ThreadStack::new(ThreadId(1), None, SessionConfig::default());
        let frame = stack
            .call_enter_detailed(SeqNo(1), FunctionId(1), Vec::new(), &methods)
            .unwrap();
        let decoder = SumDecoder::default();
        let mut values = DecodedValues::new();

        assert!(values.parameters(stack.frames(), frame, &decoder).is_err());
        assert!(values.parameters(stack.frames(), frame, &decoder).is_err());
        assert_eq!(decoder.calls.get(), 2);
        assert!(values.is_empty());
        // still on the stack, so nothing was returned yet
        assert_eq!(values.return_value(stack.frames(), frame, &decoder), Ok(None));
    }
}
