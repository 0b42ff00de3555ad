// Copyright (c) 2021 The tlaloc developers. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use tlaloc::{server, Error};

fn main() -> Result<(), Error> {
    server::run_server()
}
