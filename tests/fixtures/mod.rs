pub mod mock_launcher;
