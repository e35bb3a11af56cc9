// Validation hook run after a configuration has been deserialized
pub trait ConfigValidator {
    /// Check cross-field constraints; the default accepts everything.
    fn validate(&self) -> crate::error::Result<()> {
        Ok(())
    }
}
