use aegix_core::{AegixError, Address, Burner, PaymentSession, PaymentSessionId, PendingPaymentRequest};

/// Durable store for `PaymentSession` and `Burner` records. Sessions are
/// keyed by `session_id` so a Maximum-Privacy session paused at
/// `M2_WaitIndex` survives a node restart and can be resumed by
/// `CleanupScheduler` or an explicit `resume_session_id` call; burners are
/// keyed by address so `PaymentEngine` can re-derive a burner's keypair at
/// `M3_DecompressAndDeliver` without threading it through every call site.
pub struct PaymentStore {
    sessions: sled::Tree,
    pending: sled::Tree,
    burners: sled::Tree,
}

impl PaymentStore {
    pub fn open(db: &sled::Db) -> Result<Self, AegixError> {
        Ok(Self {
            sessions: db.open_tree("payment_sessions")?,
            pending: db.open_tree("pending_payment_requests")?,
            burners: db.open_tree("engine_burners")?,
        })
    }

    pub fn put_burner(&self, burner: &Burner) -> Result<(), AegixError> {
        let bytes = bincode::serialize(burner)?;
        self.burners.insert(burner.address.as_bytes(), bytes)?;
        self.burners.flush()?;
        Ok(())
    }

    pub fn get_burner(&self, address: &Address) -> Result<Burner, AegixError> {
        let bytes = self
            .burners
            .get(address.as_bytes())?
            .ok_or_else(|| AegixError::InvalidArgument(format!("unknown burner {address}")))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Drop a burner record once its parent session has reclaimed its rent
    /// (`S3_CloseBurner`, or the recovery branch of a failed `S2`), so
    /// `CleanupScheduler`'s idle-reclaim sweep does not revisit an account
    /// that is already closed.
    pub fn remove_burner(&self, address: &Address) -> Result<(), AegixError> {
        self.burners.remove(address.as_bytes())?;
        Ok(())
    }

    pub fn put_session(&self, session: &PaymentSession) -> Result<(), AegixError> {
        let bytes = bincode::serialize(session)?;
        self.sessions.insert(session.session_id.as_bytes(), bytes)?;
        self.sessions.flush()?;
        Ok(())
    }

    pub fn get_session(&self, session_id: &PaymentSessionId) -> Result<PaymentSession, AegixError> {
        let bytes = self
            .sessions
            .get(session_id.as_bytes())?
            .ok_or_else(|| AegixError::UnknownPaymentSession(session_id.clone()))?;
        Ok(bincode::deserialize(&bytes)?)
    }

    /// Every payment session ever created for `owner`, newest first, used by
    /// `pool.history`.
    pub fn list_sessions_for_owner(&self, owner: &Address) -> Result<Vec<PaymentSession>, AegixError> {
        let mut out = Vec::new();
        for item in self.sessions.iter() {
            let (_, bytes) = item?;
            let session: PaymentSession = bincode::deserialize(&bytes)?;
            if &session.owner == owner {
                out.push(session);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    /// All sessions currently paused waiting on the compression indexer,
    /// used by `CleanupScheduler`'s automatic retry pass.
    pub fn list_waiting_on_indexer(&self) -> Result<Vec<PaymentSession>, AegixError> {
        let mut out = Vec::new();
        for item in self.sessions.iter() {
            let (_, bytes) = item?;
            let session: PaymentSession = bincode::deserialize(&bytes)?;
            if session.status == aegix_core::PaymentStatus::WaitingOnIndexer {
                out.push(session);
            }
        }
        Ok(out)
    }

    pub fn put_pending_request(&self, req: &PendingPaymentRequest) -> Result<(), AegixError> {
        let bytes = bincode::serialize(req)?;
        self.pending.insert(req.request_id.as_bytes(), bytes)?;
        self.pending.flush()?;
        Ok(())
    }

    pub fn remove_pending_request(&self, request_id: &str) -> Result<(), AegixError> {
        self.pending.remove(request_id.as_bytes())?;
        Ok(())
    }

    pub fn list_pending_requests(&self) -> Result<Vec<PendingPaymentRequest>, AegixError> {
        let mut out = Vec::new();
        for item in self.pending.iter() {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// Every persisted burner, used by `CleanupScheduler`'s idle-rent-reclaim
    /// pass so it does not need to learn addresses from sessions first.
    pub fn list_burners(&self) -> Result<Vec<Burner>, AegixError> {
        let mut out = Vec::new();
        for item in self.burners.iter() {
            let (_, bytes) = item?;
            out.push(bincode::deserialize(&bytes)?);
        }
        Ok(out)
    }

    /// Find the session a burner was created for, so the scheduler can learn
    /// the owning address before reclaiming the burner's rent to that
    /// owner's Recovery Pool. `O(n)` over sessions; burners are few enough
    /// per node that this is cheaper than maintaining a second index.
    pub fn find_session_by_burner(&self, burner_id: &str) -> Result<Option<PaymentSession>, AegixError> {
        for item in self.sessions.iter() {
            let (_, bytes) = item?;
            let session: PaymentSession = bincode::deserialize(&bytes)?;
            if session.burner_id.as_deref() == Some(burner_id) {
                return Ok(Some(session));
            }
        }
        Ok(None)
    }
}
