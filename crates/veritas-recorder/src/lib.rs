//! Veritas Recorder: tamper-evident flight recording for agent sessions.
//!
//! Every tool call, observation, and thought an agent produces is appended
//! to a per-session hash chain. Sealing a session folds the chain into a
//! BLAKE3 Merkle root that can be committed to a public ledger through an
//! [`attest::Attestor`], and any single entry can later be proven against
//! that root with an [`proof::InclusionProof`].

pub mod attest;
pub mod canonical;
pub mod chain;
pub mod error;
pub mod evidence;
pub mod export;
pub mod hash;
pub mod manager;
pub mod merkle;
pub mod proof;
pub mod session;
pub mod store;
pub mod verify;

pub use attest::{AttestationError, AttestationReceipt, AttestationRequest, Attestor};
pub use chain::HashChain;
pub use error::{IntegrityError, RecorderError, Result};
pub use evidence::EvidencePolicy;
pub use export::SessionExport;
pub use manager::SessionManager;
pub use merkle::MerkleTree;
pub use proof::{InclusionProof, ProofStep, Side};
pub use session::Session;
pub use store::{
    FileSessionStore, MemorySessionStore, SessionHandle, SessionQuery, SessionStore,
    SessionSummary, StoreError,
};
pub use verify::{verify_export, Finding, Level, VerificationReport};

#[cfg(test)]
pub(crate) mod test_support {
    /// Finite floats whose shortest decimal form needs all 17 digits, plus
    /// a deterministic spread across magnitudes.
    pub fn awkward_floats() -> Vec<f64> {
        let mut values = vec![
            0.000_363_264_674_491_786_83,
            0.119_778_828_988_776_65,
            0.001_883_208_131_484_651_4,
            -2.5e-308,
            1.797_693_134_862_315_7e308,
        ];

        // splitmix64
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^ (z >> 31)
        };

        for i in 0..200 {
            let unit = (next() >> 11) as f64 / (1u64 << 53) as f64;
            values.push(unit * 10f64.powi(i % 12 - 6));
            let raw = f64::from_bits(next());
            if raw.is_finite() {
                values.push(raw);
            }
        }
        values
    }
}
