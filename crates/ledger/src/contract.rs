//! Call data for the patient-record access contract.

use medvault_crypto::FileHash;
use medvault_types::{Address, PatientId};

use crate::abi::{self, Token};

pub const ADD_RECORD: &str = "addRecord(string,string)";
pub const GRANT_ACCESS: &str = "grantAccess(string,address)";
pub const CHECK_ACCESS: &str = "checkAccess(string,address)";
pub const GET_FILE_HASH: &str = "getFileHash(string)";

pub fn add_record(patient: &PatientId, file_hash: &FileHash) -> Vec<u8> {
    abi::encode_call(
        ADD_RECORD,
        &[
            Token::String(patient.to_string()),
            Token::String(file_hash.to_hex()),
        ],
    )
}

pub fn grant_access(patient: &PatientId, hospital: &Address) -> Vec<u8> {
    abi::encode_call(
        GRANT_ACCESS,
        &[Token::String(patient.to_string()), Token::Address(*hospital)],
    )
}

pub fn check_access(patient: &PatientId, hospital: &Address) -> Vec<u8> {
    abi::encode_call(
        CHECK_ACCESS,
        &[Token::String(patient.to_string()), Token::Address(*hospital)],
    )
}

pub fn get_file_hash(patient: &PatientId) -> Vec<u8> {
    abi::encode_call(GET_FILE_HASH, &[Token::String(patient.to_string())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_record_carries_hex_hash() {
        let patient = PatientId::parse("p1").unwrap();
        let hash = FileHash::from_data(b"hello");
        let data = add_record(&patient, &hash);

        assert_eq!(&data[..4], &abi::selector(ADD_RECORD));
        let body = &data[4..];
        let needle = hash.to_hex();
        assert!(body
            .windows(needle.len())
            .any(|window| window == needle.as_bytes()));
    }

    #[test]
    fn selectors_are_distinct() {
        let selectors = [
            abi::selector(ADD_RECORD),
            abi::selector(GRANT_ACCESS),
            abi::selector(CHECK_ACCESS),
            abi::selector(GET_FILE_HASH),
        ];
        for (i, a) in selectors.iter().enumerate() {
            for b in &selectors[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
