//! Single-flight bookkeeping: at most one computation per fingerprint key.

use crate::error::ArtifactError;
use crate::fingerprint::FingerprintKey;
use crate::Payload;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type CallResult = Result<Payload, ArtifactError>;

pub(crate) struct Call {
    result: Mutex<Option<CallResult>>,
    ready: Condvar,
}

impl Call {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Block until the leader publishes its outcome.
    pub(crate) fn wait(&self) -> CallResult {
        let mut slot = self.result.lock();
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    fn resolve(&self, result: CallResult) {
        let mut slot = self.result.lock();
        if slot.is_none() {
            *slot = Some(result);
        }
        self.ready.notify_all();
    }
}

pub(crate) enum Claim<'a> {
    Leader(Leader<'a>),
    Follower(Arc<Call>),
}

/// The caller that runs the computation. Dropping a leader without calling
/// [`Leader::complete`] wakes every follower with an error.
pub(crate) struct Leader<'a> {
    map: &'a InFlightMap,
    key: FingerprintKey,
    call: Arc<Call>,
    done: bool,
}

impl Leader<'_> {
    pub(crate) fn complete(mut self, result: CallResult) -> CallResult {
        self.finish(result.clone());
        result
    }

    fn finish(&mut self, result: CallResult) {
        self.done = true;
        self.call.resolve(result);
        let mut calls = self.map.calls.lock();
        if calls
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.call))
        {
            calls.remove(&self.key);
        }
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.finish(Err(ArtifactError::Decode {
                path: Default::default(),
                message: "artifact computation aborted".to_string(),
            }));
        }
    }
}

#[derive(Default)]
pub(crate) struct InFlightMap {
    calls: Mutex<HashMap<FingerprintKey, Arc<Call>>>,
}

impl InFlightMap {
    pub(crate) fn claim(&self, key: &FingerprintKey) -> Claim<'_> {
        let mut calls = self.calls.lock();
        if let Some(call) = calls.get(key) {
            return Claim::Follower(Arc::clone(call));
        }
        let call = Arc::new(Call::new());
        calls.insert(key.clone(), Arc::clone(&call));
        Claim::Leader(Leader {
            map: self,
            key: key.clone(),
            call,
            done: false,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn key() -> FingerprintKey {
        FingerprintKey::parse("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_second_claim_follows() {
        let map = InFlightMap::default();
        let leader = match map.claim(&key()) {
            Claim::Leader(leader) => leader,
            Claim::Follower(_) => panic!("first claim must lead"),
        };
        assert!(matches!(map.claim(&key()), Claim::Follower(_)));
        assert_eq!(map.len(), 1);

        let payload: Payload = Arc::from(&b"abc"[..]);
        leader.complete(Ok(payload)).unwrap();
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_followers_receive_leader_result() {
        let map = InFlightMap::default();
        let leader = match map.claim(&key()) {
            Claim::Leader(leader) => leader,
            Claim::Follower(_) => panic!("first claim must lead"),
        };
        let barrier = Barrier::new(5);

        thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let call = match map.claim(&key()) {
                            Claim::Follower(call) => call,
                            Claim::Leader(_) => panic!("leader already registered"),
                        };
                        barrier.wait();
                        call.wait()
                    })
                })
                .collect();

            barrier.wait();
            leader.complete(Ok(Arc::from(&b"shared"[..]))).unwrap();

            for handle in handles {
                let bytes = handle.join().unwrap().unwrap();
                assert_eq!(&bytes[..], b"shared");
            }
        });
    }

    #[test]
    fn test_dropped_leader_releases_followers() {
        let map = InFlightMap::default();
        let follower = {
            let _leader = match map.claim(&key()) {
                Claim::Leader(leader) => leader,
                Claim::Follower(_) => panic!("first claim must lead"),
            };
            match map.claim(&key()) {
                Claim::Follower(call) => call,
                Claim::Leader(_) => panic!("leader already registered"),
            }
        };

        assert!(follower.wait().is_err());
        assert_eq!(map.len(), 0);
        assert!(matches!(map.claim(&key()), Claim::Leader(_)));
    }
}
