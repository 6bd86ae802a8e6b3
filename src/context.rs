use crate::crypto::{CipherKey, FieldCodec};
use crate::error::DiscoveryError;
use crate::token::TokenGenerator;

/// Shared protocol parameters: how fields are sealed and which token is valid today.
///
/// Both ends must agree on every value in here; a mismatch simply makes all
/// traffic look forged.
#[derive(Debug, Clone)]
pub struct DiscoveryContext {
    codec: FieldCodec,
    tokens: TokenGenerator,
}

impl DiscoveryContext {
    pub fn new(codec: FieldCodec, tokens: TokenGenerator) -> Self {
        Self { codec, tokens }
    }

    /// Default framing and GMT tokens, keyed from a shared secret.
    pub fn from_secret(secret: &[u8]) -> Result<Self, DiscoveryError> {
        let key = CipherKey::derive(secret)?;
        Ok(Self::new(FieldCodec::new(key), TokenGenerator::default()))
    }

    pub fn codec(&self) -> &FieldCodec {
        &self.codec
    }

    pub fn tokens(&self) -> &TokenGenerator {
        &self.tokens
    }

    /// Today's token, sealed for the validation field.
    pub fn sealed_token(&self) -> Result<Vec<u8>, DiscoveryError> {
        let token = self.tokens.token()?;
        self.codec.seal(&token)
    }
}
