//! Term aggregation across risk-node responses
//!
//! Each numeric field is aggregated independently: the spread
//! `max - min` must stay within `tolerance_bps` of the floor average, and the
//! accepted value is that floor average. A single diverging field fails the
//! whole aggregation.
//!
//! Aggregation is split in two phases so callers can run further admission
//! checks before anything is recorded:
//! - [`ConsensusAggregator::evaluate`] is a pure read producing an [`Agreement`]
//! - [`ConsensusAggregator::commit`] consumes the signers and the request

use std::collections::{BTreeSet, HashMap, HashSet};

use meridian_common::{
    config::ConsensusSettings,
    error::{AuthError, ConsensusError},
    math::{self, BPS_SCALE},
    Address, Height, LoanRequest, LoanTerms, NodeResponse, ProtocolError, RequestHash, Result,
};
use tracing::{debug, info, instrument, warn};

use crate::verifier::SignatureVerifier;

/// Consensus bookkeeping kept in the protocol store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusState {
    /// Responses submitted one by one, awaiting finalization
    pending: HashMap<RequestHash, PendingRequest>,
    /// Signers whose responses were consumed by an agreement
    consumed: HashMap<RequestHash, BTreeSet<Address>>,
    /// Requests that already produced terms
    processed: HashSet<RequestHash>,
    /// Borrower nonces already used
    nonces: HashSet<(Address, u64)>,
}

/// Responses held for one request, with what is needed to prune them
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRequest {
    borrower: Address,
    nonce: u64,
    expiration_height: Height,
    responses: Vec<NodeResponse>,
}

impl ConsensusState {
    pub fn pending_count(&self, request: &RequestHash) -> usize {
        self.pending.get(request).map_or(0, |p| p.responses.len())
    }

    /// Number of requests with responses held
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Drop responses held for requests expired at `height`
    ///
    /// Returns how many requests were dropped.
    pub fn prune_expired(&mut self, height: Height) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| height <= p.expiration_height);
        before - self.pending.len()
    }

    pub fn is_processed(&self, request: &RequestHash) -> bool {
        self.processed.contains(request)
    }

    pub fn is_consumed(&self, request: &RequestHash, signer: &Address) -> bool {
        self.consumed
            .get(request)
            .is_some_and(|signers| signers.contains(signer))
    }

    /// Responses submitted for `request` and not yet finalized
    pub fn pending_responses(&self, request: &RequestHash) -> &[NodeResponse] {
        self.pending
            .get(request)
            .map(|p| p.responses.as_slice())
            .unwrap_or_default()
    }

    fn pending_response(&self, request: &RequestHash, signer: &Address) -> Option<&NodeResponse> {
        self.pending
            .get(request)?
            .responses
            .iter()
            .find(|r| &r.signer == signer)
    }

    /// Drop every held request sharing a consumed borrower nonce
    fn drop_pending_for(&mut self, borrower: &Address, nonce: u64) {
        self.pending
            .retain(|_, p| !(p.borrower == *borrower && p.nonce == nonce));
    }
}

/// Terms accepted for a request, not yet committed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agreement {
    pub request_hash: RequestHash,
    pub borrower: Address,
    pub nonce: u64,
    pub terms: LoanTerms,
    pub signers: Vec<Address>,
}

/// Aggregates signed responses into agreed loan terms
#[derive(Debug)]
pub struct ConsensusAggregator {
    settings: ConsensusSettings,
    verifier: SignatureVerifier,
}

impl ConsensusAggregator {
    pub fn new(settings: ConsensusSettings, verifier: SignatureVerifier) -> Self {
        Self { settings, verifier }
    }

    /// Aggregator using Ed25519 signatures and the configured signer set
    pub fn ed25519(settings: ConsensusSettings) -> Self {
        let verifier = SignatureVerifier::ed25519(settings.authorized_signers.clone());
        Self::new(settings, verifier)
    }

    pub fn settings(&self) -> &ConsensusSettings {
        &self.settings
    }

    /// Verify a single response and hold it for [`Self::finalize`]
    ///
    /// Returns the number of responses now pending for the request. Requests
    /// expired at `height` are pruned on the way.
    #[instrument(skip(self, state, request, response), fields(signer = %response.signer))]
    pub fn submit_response(
        &self,
        state: &mut ConsensusState,
        request: &LoanRequest,
        response: NodeResponse,
        height: Height,
    ) -> Result<usize> {
        let hash = request.hash();
        self.ensure_not_replayed(state, request, &hash)?;
        self.verifier.verify(request, &response, height)?;

        if state.is_consumed(&hash, &response.signer)
            || state.pending_response(&hash, &response.signer).is_some()
        {
            return Err(duplicate(&response.signer, &hash));
        }

        let pruned = state.prune_expired(height);
        if pruned > 0 {
            debug!(pruned, "Dropped responses for expired requests");
        }

        let pending = state.pending.entry(hash).or_insert_with(|| PendingRequest {
            borrower: request.borrower,
            nonce: request.nonce,
            expiration_height: request.expiration_height,
            responses: Vec::new(),
        });
        pending.responses.push(response);
        let count = pending.responses.len();
        debug!(request = %hash, pending = count, "Node response accepted");
        Ok(count)
    }

    /// Aggregate the responses submitted so far and commit the result
    pub fn finalize(
        &self,
        state: &mut ConsensusState,
        request: &LoanRequest,
        height: Height,
    ) -> Result<Agreement> {
        let hash = request.hash();
        let responses = state.pending_responses(&hash).to_vec();
        let agreement = self.evaluate(state, request, &responses, height)?;
        self.commit(state, &agreement);
        Ok(agreement)
    }

    /// Verify and aggregate `responses` without recording anything
    #[instrument(skip(self, state, request, responses), fields(count = responses.len()))]
    pub fn evaluate(
        &self,
        state: &ConsensusState,
        request: &LoanRequest,
        responses: &[NodeResponse],
        height: Height,
    ) -> Result<Agreement> {
        let hash = request.hash();
        self.ensure_not_replayed(state, request, &hash)?;

        let mut signers = BTreeSet::new();
        for response in responses {
            self.verifier.verify(request, response, height)?;

            let conflicting = state
                .pending_response(&hash, &response.signer)
                .is_some_and(|held| held != response);
            if state.is_consumed(&hash, &response.signer)
                || conflicting
                || !signers.insert(response.signer)
            {
                warn!(signer = %response.signer, request = %hash, "Duplicate signer");
                return Err(duplicate(&response.signer, &hash));
            }
        }

        if responses.is_empty() || responses.len() < self.settings.min_responses {
            return Err(ConsensusError::InsufficientResponses {
                received: responses.len(),
                required: self.settings.min_responses.max(1),
            }
            .into());
        }

        let interest_rate = self.aggregate_field("interest_rate", responses, |r| {
            r.terms.interest_rate
        })?;
        let collateral_ratio = self.aggregate_field("collateral_ratio", responses, |r| {
            r.terms.collateral_ratio
        })?;
        let max_loan_amount = self.aggregate_field("max_loan_amount", responses, |r| {
            r.terms.max_loan_amount
        })?;

        let terms = LoanTerms::new(interest_rate, collateral_ratio, max_loan_amount);
        debug!(request = %hash, ?terms, "Responses agree");

        Ok(Agreement {
            request_hash: hash,
            borrower: request.borrower,
            nonce: request.nonce,
            terms,
            signers: signers.into_iter().collect(),
        })
    }

    /// Record an agreement: its signers, request and nonce are consumed
    ///
    /// Responses held for any request with the same borrower nonce are
    /// dropped, since that nonce can no longer be used.
    pub fn commit(&self, state: &mut ConsensusState, agreement: &Agreement) {
        state.drop_pending_for(&agreement.borrower, agreement.nonce);
        state
            .consumed
            .entry(agreement.request_hash)
            .or_default()
            .extend(agreement.signers.iter().copied());
        state.processed.insert(agreement.request_hash);
        state.nonces.insert((agreement.borrower, agreement.nonce));

        info!(
            request = %agreement.request_hash,
            signers = agreement.signers.len(),
            interest_rate = agreement.terms.interest_rate(),
            collateral_ratio = agreement.terms.collateral_ratio(),
            max_loan_amount = agreement.terms.max_loan_amount(),
            "Loan terms agreed"
        );
    }

    fn ensure_not_replayed(
        &self,
        state: &ConsensusState,
        request: &LoanRequest,
        hash: &RequestHash,
    ) -> Result<()> {
        if state.processed.contains(hash) || state.nonces.contains(&(request.borrower, request.nonce))
        {
            return Err(AuthError::RequestReplayed {
                request: hash.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Floor average of one field, provided the spread is within tolerance
    fn aggregate_field(
        &self,
        field: &'static str,
        responses: &[NodeResponse],
        value: impl Fn(&NodeResponse) -> u128,
    ) -> Result<u128> {
        let mut min = u128::MAX;
        let mut max = 0u128;
        let mut sum = 0u128;
        for response in responses {
            let v = value(response);
            min = min.min(v);
            max = max.max(v);
            sum = math::add(sum, v)?;
        }

        let average = sum / responses.len() as u128;
        let spread = max - min;
        let tolerance_bps = self.settings.tolerance_bps;

        let lhs = math::mul(spread, BPS_SCALE)?;
        let rhs = math::mul(u128::from(tolerance_bps), average)?;
        if lhs > rhs {
            warn!(field, spread, average, tolerance_bps, "Responses diverged");
            return Err(ProtocolError::from(ConsensusError::ResponsesDiverged {
                field,
                spread,
                average,
                tolerance_bps,
            }));
        }

        Ok(average)
    }
}

fn duplicate(signer: &Address, request: &RequestHash) -> ProtocolError {
    AuthError::DuplicateSigner {
        signer: signer.to_string(),
        request: request.to_string(),
    }
    .into()
}
