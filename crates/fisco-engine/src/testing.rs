//! Scripted authority client for pipeline tests.
//!
//! Verdicts are queued per operation and consumed in order; a call with an
//! empty queue panics, so a test that passes also proves which calls were
//! (and were not) made. Submitted XML is captured for inspection.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::authority::{
    AuthorityClient, AuthorityContext, CancelOutcome, DocumentStanding, ReceiptOutcome,
    ServiceStatus, SubmissionOutcome,
};
use crate::error::EngineResult;

/// An [`AuthorityClient`] that replays scripted outcomes.
#[derive(Default)]
pub(crate) struct StubAuthority {
    statuses: Mutex<VecDeque<EngineResult<ServiceStatus>>>,
    submissions: Mutex<VecDeque<EngineResult<SubmissionOutcome>>>,
    receipts: Mutex<VecDeque<EngineResult<ReceiptOutcome>>>,
    standings: Mutex<VecDeque<EngineResult<DocumentStanding>>>,
    cancels: Mutex<VecDeque<EngineResult<CancelOutcome>>>,

    /// Every signed document XML passed to `submit`, in call order.
    pub(crate) submitted_xml: Mutex<Vec<String>>,
    /// Every signed event XML passed to `cancel`, in call order.
    pub(crate) cancelled_xml: Mutex<Vec<String>>,
    /// Every receipt number passed to `query_receipt`, in call order.
    pub(crate) receipt_queries: Mutex<Vec<String>>,
    /// Every access key passed to `query_key`, in call order.
    pub(crate) key_queries: Mutex<Vec<String>>,
}

impl StubAuthority {
    pub(crate) fn new() -> Self {
        StubAuthority::default()
    }

    /// Queues the next `check_status` outcome.
    pub(crate) fn expect_status(self, outcome: EngineResult<ServiceStatus>) -> Self {
        self.statuses.lock().unwrap().push_back(outcome);
        self
    }

    /// Queues the next `submit` outcome.
    pub(crate) fn expect_submit(self, outcome: EngineResult<SubmissionOutcome>) -> Self {
        self.submissions.lock().unwrap().push_back(outcome);
        self
    }

    /// Queues the next `query_receipt` outcome.
    pub(crate) fn expect_receipt(self, outcome: EngineResult<ReceiptOutcome>) -> Self {
        self.receipts.lock().unwrap().push_back(outcome);
        self
    }

    /// Queues the next `query_key` outcome.
    pub(crate) fn expect_standing(self, outcome: EngineResult<DocumentStanding>) -> Self {
        self.standings.lock().unwrap().push_back(outcome);
        self
    }

    /// Queues the next `cancel` outcome.
    pub(crate) fn expect_cancel(self, outcome: EngineResult<CancelOutcome>) -> Self {
        self.cancels.lock().unwrap().push_back(outcome);
        self
    }
}

#[async_trait]
impl AuthorityClient for StubAuthority {
    async fn check_status(&self, _ctx: &AuthorityContext<'_>) -> EngineResult<ServiceStatus> {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted check_status call")
    }

    async fn submit(
        &self,
        _ctx: &AuthorityContext<'_>,
        signed_xml: &str,
    ) -> EngineResult<SubmissionOutcome> {
        self.submitted_xml.lock().unwrap().push(signed_xml.to_string());
        self.submissions
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted submit call")
    }

    async fn query_receipt(
        &self,
        _ctx: &AuthorityContext<'_>,
        receipt_number: &str,
    ) -> EngineResult<ReceiptOutcome> {
        self.receipt_queries
            .lock()
            .unwrap()
            .push(receipt_number.to_string());
        self.receipts
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted query_receipt call")
    }

    async fn query_key(
        &self,
        _ctx: &AuthorityContext<'_>,
        access_key: &str,
    ) -> EngineResult<DocumentStanding> {
        self.key_queries.lock().unwrap().push(access_key.to_string());
        self.standings
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted query_key call")
    }

    async fn cancel(
        &self,
        _ctx: &AuthorityContext<'_>,
        signed_event_xml: &str,
    ) -> EngineResult<CancelOutcome> {
        self.cancelled_xml
            .lock()
            .unwrap()
            .push(signed_event_xml.to_string());
        self.cancels
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted cancel call")
    }
}
