//! The process-wide channel registry.
//!
//! One constant per logical operation; channels are never constructed
//! dynamically. Datastore channels take the collection name as their
//! first argument. The shell channels are consumed by the window/dialog
//! collaborators outside this crate; the push channels flow from the
//! responder to the initiator.

// Datastore channels (initiator -> responder)
pub const STORE_REGISTER: &str = "store:register";
pub const STORE_COUNT: &str = "store:count";
pub const STORE_FIND: &str = "store:find";
pub const STORE_FIND_ONE: &str = "store:find-one";
pub const STORE_INSERT_ONE: &str = "store:insert-one";
pub const STORE_UPDATE_ONE: &str = "store:update-one";
pub const STORE_UPSERT_ONE: &str = "store:upsert-one";
pub const STORE_REMOVE_ONE: &str = "store:remove-one";
pub const STORE_REMOVE: &str = "store:remove";

// Shell channels (initiator -> responder)
pub const WINDOW_TOGGLE_FILL: &str = "window:toggle-fill";
pub const APP_RESET_SETTINGS: &str = "app:reset-settings";
pub const APP_DETAILS: &str = "app:details";
pub const MENU_OPEN: &str = "menu:open";
pub const ASSET_READ: &str = "asset:read";
pub const DIALOG_SELECT_DIRECTORY: &str = "dialog:select-directory";
pub const DIALOG_SELECT_FILE: &str = "dialog:select-file";
pub const FS_READ_DIRECTORY: &str = "fs:read-directory";
pub const FS_READ_DIRECTORY_STREAM: &str = "fs:read-directory-stream";
pub const FS_READ_FILE: &str = "fs:read-file";
pub const IMAGE_SCALE: &str = "image:scale";

// Push channels (responder -> initiator)
pub const PUSH_REMOVE_PERSISTED_STATE: &str = "push:remove-persisted-state";
pub const PUSH_OPEN_SETTINGS: &str = "push:open-settings";
