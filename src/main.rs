// Vault Desktop - Tauri v2
// Main entry point

#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

fn main() {
    vault_desktop::run()
}
