//! Instruction discriminators understood by the percolator program.
//!
//! These values are the program's wire contract. They are never reordered;
//! the gaps (6, 10, 11, 13..=15) belong to operations this keeper never sends.

use num_derive::FromPrimitive;

pub const TAG_INIT_MARKET: u8 = 0;
pub const TAG_INIT_USER: u8 = 1;
pub const TAG_INIT_LP: u8 = 2;
pub const TAG_DEPOSIT_COLLATERAL: u8 = 3;
pub const TAG_WITHDRAW_COLLATERAL: u8 = 4;
pub const TAG_KEEPER_CRANK: u8 = 5;
pub const TAG_LIQUIDATE_AT_ORACLE: u8 = 7;
pub const TAG_CLOSE_ACCOUNT: u8 = 8;
pub const TAG_TOP_UP_INSURANCE: u8 = 9;
pub const TAG_UPDATE_ADMIN: u8 = 12;
pub const TAG_SET_ORACLE_AUTHORITY: u8 = 16;
pub const TAG_PUSH_ORACLE_PRICE: u8 = 17;

/// Typed view of the tags above, for decoding payloads.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum InstructionTag {
    InitMarket = TAG_INIT_MARKET,
    InitUser = TAG_INIT_USER,
    InitLP = TAG_INIT_LP,
    DepositCollateral = TAG_DEPOSIT_COLLATERAL,
    WithdrawCollateral = TAG_WITHDRAW_COLLATERAL,
    KeeperCrank = TAG_KEEPER_CRANK,
    LiquidateAtOracle = TAG_LIQUIDATE_AT_ORACLE,
    CloseAccount = TAG_CLOSE_ACCOUNT,
    TopUpInsurance = TAG_TOP_UP_INSURANCE,
    UpdateAdmin = TAG_UPDATE_ADMIN,
    SetOracleAuthority = TAG_SET_ORACLE_AUTHORITY,
    PushOraclePrice = TAG_PUSH_ORACLE_PRICE,
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    const ALL: &[u8] = &[
        TAG_INIT_MARKET,
        TAG_INIT_USER,
        TAG_INIT_LP,
        TAG_DEPOSIT_COLLATERAL,
        TAG_WITHDRAW_COLLATERAL,
        TAG_KEEPER_CRANK,
        TAG_LIQUIDATE_AT_ORACLE,
        TAG_CLOSE_ACCOUNT,
        TAG_TOP_UP_INSURANCE,
        TAG_UPDATE_ADMIN,
        TAG_SET_ORACLE_AUTHORITY,
        TAG_PUSH_ORACLE_PRICE,
    ];

    #[test]
    fn no_duplicate_tags() {
        for i in 0..ALL.len() {
            for j in (i + 1)..ALL.len() {
                assert_ne!(ALL[i], ALL[j], "Duplicate tag value: {}", ALL[i]);
            }
        }
    }

    #[test]
    fn every_tag_maps_to_enum() {
        for &tag in ALL {
            let typed = InstructionTag::from_u8(tag).expect("known tag");
            assert_eq!(typed as u8, tag);
        }
        assert!(InstructionTag::from_u8(6).is_none());
        assert!(InstructionTag::from_u8(255).is_none());
    }
}
