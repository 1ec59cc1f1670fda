//! Contract ABIs the pipeline talks to.
//!
//! Declared through `abigen!` so every fragment is parsed and type-checked at
//! compile time; a wrong argument type fails the build instead of producing a
//! calldata blob the wallet reverts on.

pub mod smart_wallet {
    use ethers::contract::abigen;

    abigen!(
        SmartWallet,
        r#"[
            struct Call { address dest; uint256 value; bytes data; }
            function execute(address dest, uint256 value, bytes func)
            function executeBatch(Call[] calls)
        ]"#
    );
}

pub mod wallet_factory {
    use ethers::contract::abigen;

    abigen!(
        WalletFactory,
        r#"[
            function getAddress(bytes32[2] key, uint256 salt) view returns (address)
            function createAccount(bytes32[2] key, uint256 salt) returns (address)
        ]"#
    );
}

pub mod entry_point {
    use ethers::contract::abigen;

    abigen!(
        EntryPoint,
        r#"[
            struct UserOperation { address sender; uint256 nonce; bytes initCode; bytes callData; uint256 callGasLimit; uint256 verificationGasLimit; uint256 preVerificationGas; uint256 maxFeePerGas; uint256 maxPriorityFeePerGas; bytes paymasterAndData; bytes signature; }
            function getNonce(address sender, uint192 key) view returns (uint256)
            function getUserOpHash(UserOperation userOp) view returns (bytes32)
        ]"#
    );

    impl From<&crate::types::UserOperation> for UserOperation {
        fn from(op: &crate::types::UserOperation) -> Self {
            Self {
                sender: op.sender,
                nonce: op.nonce,
                init_code: op.init_code.clone(),
                call_data: op.call_data.clone(),
                call_gas_limit: op.call_gas_limit,
                verification_gas_limit: op.verification_gas_limit,
                pre_verification_gas: op.pre_verification_gas,
                max_fee_per_gas: op.max_fee_per_gas,
                max_priority_fee_per_gas: op.max_priority_fee_per_gas,
                paymaster_and_data: op.paymaster_and_data.clone(),
                signature: op.signature.clone(),
            }
        }
    }
}

pub mod bonus_token {
    use ethers::contract::abigen;

    // Only the calls the wallet makes; bonus rules live in the contract.
    abigen!(
        BonusToken,
        r#"[
            function balanceOf(address owner) view returns (uint256)
            function transfer(address to, uint256 amount) returns (bool)
            function claimWelcomeBonus()
        ]"#
    );
}
