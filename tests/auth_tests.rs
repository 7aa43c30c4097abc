//! Integration tests for the login response
//!
//! These tests build login responses from parsed challenges and check the
//! digest, the option handling and the classification of the server's
//! answer, without a MonetDB server.

use monetdb_rs::capabilities::{Challenge, RequestedCapabilities};
use monetdb_rs::crypto::{credential_digest, prehash_password, HashAlgorithm};
use monetdb_rs::messages::{AuthMessage, AuthResult, HandshakeOption, Redirect};
use monetdb_rs::{Capabilities, Error};

const SHA512_OF_MONETDB: &str = "a73f1d86383446438ac64f56e15ada38b41fbb18f029d2181723aeb2acac6a831f60e5fdbd64ac2c8c70e035dd44cbbe3b45565ef2d58feb2821a2078c7fad35";

fn session_options() -> Vec<HandshakeOption> {
    vec![
        HandshakeOption::auto_commit(false),
        HandshakeOption::reply_size(100),
        HandshakeOption::size_header(true),
        HandshakeOption::time_zone(-7200),
    ]
}

/// Capabilities of a client that wants file transfers
fn with_transfers(challenge: &Challenge) -> Capabilities {
    let requested = RequestedCapabilities {
        binary: true,
        file_transfer: true,
        client_info: true,
    };
    Capabilities::negotiate(requested, challenge)
}

mod digest_tests {
    use super::*;

    #[test]
    fn test_prehash_uses_password_algorithm() {
        assert_eq!(
            prehash_password(HashAlgorithm::Sha512, "monetdb"),
            SHA512_OF_MONETDB
        );
        assert_eq!(
            prehash_password(HashAlgorithm::Sha1, "secret"),
            "e5e9fa1ba31ecd1ae84f75caaa474f3a663f05f4"
        );
    }

    #[test]
    fn test_credential_digest_is_tagged() {
        let prehashed = prehash_password(HashAlgorithm::Sha1, "secret");
        assert_eq!(
            credential_digest(HashAlgorithm::Md5, &prehashed, "abc"),
            "{MD5}1a63f8a623e47aa75c90e980518a124b"
        );
    }

    #[test]
    fn test_algorithm_names_round_trip() {
        for algorithm in [
            HashAlgorithm::Sha512,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha224,
            HashAlgorithm::Sha1,
            HashAlgorithm::Md5,
        ] {
            assert_eq!(HashAlgorithm::from_name(algorithm.name()), Some(algorithm));
            assert_eq!(algorithm.to_string(), algorithm.name());
        }
    }
}

mod response_tests {
    use super::*;

    #[test]
    fn test_legacy_algorithm_is_skipped() {
        // RIPEMD160 is offered first but cannot be computed; SHA256 is used
        let challenge = Challenge::parse("s4lt:mserver:9:RIPEMD160,SHA256:LIT:SHA512:").unwrap();
        let auth = AuthMessage::new("monetdb", "monetdb", "sql", "demo");
        let response = auth
            .build_response(&challenge, &with_transfers(&challenge), &mut [])
            .unwrap();
        assert_eq!(
            response,
            "BIG:monetdb:{SHA256}3e940bdebba384e92a8565a4079858201497af88952575fef136bd9c8e1a7169:sql:demo:"
        );
    }

    #[test]
    fn test_all_options_below_level_are_sent() {
        let challenge = Challenge::parse("s4lt:mserver:9:SHA256:LIT:SHA512:sql=6:").unwrap();
        let auth = AuthMessage::new("monetdb", "monetdb", "sql", "demo");
        let mut options = session_options();
        let response = auth
            .build_response(&challenge, &with_transfers(&challenge), &mut options)
            .unwrap();
        assert!(response.ends_with(
            ":sql:demo:FILETRANS:auto_commit=0,reply_size=100,size_header=1,time_zone=-7200:"
        ));
        assert!(options.iter().all(|o| o.sent));
    }

    #[test]
    fn test_option_at_level_is_held_back() {
        // size_header has level 3, so sql=3 only covers auto_commit and reply_size
        let challenge = Challenge::parse("s4lt:mserver:9:SHA256:LIT:SHA512:sql=3:").unwrap();
        let auth = AuthMessage::new("monetdb", "monetdb", "sql", "demo");
        let mut options = session_options();
        auth.build_response(&challenge, &with_transfers(&challenge), &mut options)
            .unwrap();
        let sent: Vec<&str> = options.iter().filter(|o| o.sent).map(|o| o.name).collect();
        assert_eq!(sent, vec!["auto_commit", "reply_size"]);
    }

    #[test]
    fn test_unknown_password_algorithm() {
        let challenge = Challenge::parse("s4lt:mserver:9:SHA256:LIT:WHIRLPOOL:").unwrap();
        let auth = AuthMessage::new("monetdb", "monetdb", "sql", "demo");
        assert!(matches!(
            auth.build_response(&challenge, &with_transfers(&challenge), &mut []),
            Err(Error::UnsupportedHashAlgorithms(ref names)) if names == "WHIRLPOOL"
        ));
    }
}

mod result_tests {
    use super::*;

    #[test]
    fn test_info_message_is_kept() {
        assert_eq!(
            AuthResult::parse("#server is in maintenance mode\n").unwrap(),
            AuthResult::Ok(Some("server is in maintenance mode".to_string()))
        );
    }

    #[test]
    fn test_server_redirect_with_query() {
        assert_eq!(
            AuthResult::parse("^mapi:monetdb://10.0.0.5:50001/sales?lang=sql\n").unwrap(),
            AuthResult::Redirect(Redirect::Server {
                host: "10.0.0.5".to_string(),
                port: 50001,
                database: "sales".to_string(),
            })
        );
    }

    #[test]
    fn test_rejection_is_authentication_error() {
        let err = AuthResult::parse("!InvalidCredentialsException:checkCredentials:invalid credentials for user 'monetdb'\n")
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(_)));
        assert!(!err.is_fatal());
    }
}
