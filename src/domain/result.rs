//! Result type alias

use super::errors::AddressBookError;

/// Result type alias for all library operations
///
/// # Examples
///
/// ```
/// use addressbook_sync::domain::result::Result;
/// use addressbook_sync::domain::errors::AddressBookError;
///
/// fn failing_function() -> Result<()> {
///     Err(AddressBookError::Validation("Invalid input".to_string()))
/// }
///
/// assert!(failing_function().is_err());
/// ```
pub type Result<T> = std::result::Result<T, AddressBookError>;
