pub mod mock_node;
