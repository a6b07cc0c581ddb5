//! Account reads and transaction submission over JSON-RPC.

use crate::error::KeeperError;
use crate::ix;
use crate::keeper::InstructionSink;
use crate::price::AccountSource;
use async_trait::async_trait;
use solana_client::{nonblocking::rpc_client::RpcClient, rpc_config::RpcSendTransactionConfig};
use solana_program::{instruction::Instruction, pubkey::Pubkey};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    compute_budget::ComputeBudgetInstruction,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use tracing::{debug, trace};

pub struct RpcTransport {
    client: RpcClient,
    payer: Keypair,
    commitment: CommitmentConfig,
    skip_preflight: bool,
    max_retries: Option<usize>,
}

impl RpcTransport {
    /// Confirmed commitment, preflight skipped: keeper traffic is retried by
    /// the next iteration anyway.
    pub fn new(rpc_url: String, payer: Keypair) -> Self {
        let commitment = CommitmentConfig::confirmed();
        RpcTransport {
            client: RpcClient::new_with_commitment(rpc_url, commitment),
            payer,
            commitment,
            skip_preflight: true,
            max_retries: None,
        }
    }

    /// Simulate before sending. Admin flows want the program's error before
    /// anything lands.
    pub fn with_preflight(mut self) -> Self {
        self.skip_preflight = false;
        self
    }

    /// How many times the RPC node rebroadcasts a transaction it has accepted.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    /// Sends `instructions` in one transaction behind a compute-unit limit and
    /// waits for it to land. A transaction that lands with an error status is
    /// a `SubmissionFailure`.
    pub async fn send(
        &self,
        instructions: &[Instruction],
        compute_units: u32,
    ) -> Result<Signature, KeeperError> {
        let mut all = Vec::with_capacity(instructions.len() + 1);
        all.push(ComputeBudgetInstruction::set_compute_unit_limit(compute_units));
        all.extend_from_slice(instructions);

        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| KeeperError::Rpc(e.to_string()))?;
        let tx = Transaction::new_signed_with_payer(
            &all,
            Some(&self.payer.pubkey()),
            &[&self.payer],
            blockhash,
        );

        let config = RpcSendTransactionConfig {
            skip_preflight: self.skip_preflight,
            preflight_commitment: Some(self.commitment.commitment),
            max_retries: self.max_retries,
            ..RpcSendTransactionConfig::default()
        };
        let signature = self
            .client
            .send_transaction_with_config(&tx, config)
            .await
            .map_err(|e| KeeperError::SubmissionFailure(e.to_string()))?;
        self.client
            .poll_for_signature_with_commitment(&signature, self.commitment)
            .await
            .map_err(|e| KeeperError::SubmissionFailure(format!("{signature}: {e}")))?;

        // Polling returns once the signature is known, whatever its outcome.
        let status = self
            .client
            .get_signature_status_with_commitment(&signature, self.commitment)
            .await
            .map_err(|e| KeeperError::SubmissionFailure(format!("{signature}: {e}")))?;
        match status {
            Some(Ok(())) => {
                trace!(%signature, compute_units, "transaction confirmed");
                Ok(signature)
            }
            Some(Err(e)) => Err(KeeperError::SubmissionFailure(format!("{signature} failed: {e}"))),
            None => Err(KeeperError::SubmissionFailure(format!(
                "{signature}: no status after confirmation"
            ))),
        }
    }
}

#[async_trait]
impl AccountSource for RpcTransport {
    async fn account_data(&self, key: &Pubkey) -> Result<Vec<u8>, KeeperError> {
        let response = self
            .client
            .get_account_with_commitment(key, self.commitment)
            .await
            .map_err(|e| KeeperError::Rpc(e.to_string()))?;
        response
            .value
            .map(|account| account.data)
            .ok_or(KeeperError::AccountNotFound(*key))
    }
}

#[async_trait]
impl InstructionSink for RpcTransport {
    async fn submit(
        &self,
        instruction: Instruction,
        compute_units: u32,
    ) -> Result<Signature, KeeperError> {
        match ix::Instruction::decode(&instruction.data) {
            Ok(decoded) => {
                debug!(instruction = decoded.name(), ?decoded, compute_units, "submitting")
            }
            Err(_) => debug!(
                program = %instruction.program_id,
                compute_units,
                "submitting opaque instruction"
            ),
        }
        self.send(&[instruction], compute_units).await
    }
}
