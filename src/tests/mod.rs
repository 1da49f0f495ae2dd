// Test modules for Reelchat
// Each module covers one subsystem; shared fixtures live in helpers

mod helpers;

mod sync_tests;
