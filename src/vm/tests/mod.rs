// All the tests with prefix 'mock_test_' run with the feature 'mock_test' and use MockVM.
// Each test starts with a fresh mock host, so a test creates its own JVMCI instance with the
// fixtures in `crate::util::test_util::fixtures`.

#[cfg(feature = "mock_test")]
mod mock_tests;
