// SPDX-License-Identifier: MPL-2.0

pub(crate) use crate::{
    error::{Errno::*, Error},
    return_errno, return_errno_with_msg,
};

pub(crate) type Result<T> = core::result::Result<T, Error>;

pub(crate) use core::fmt::{self, Debug};

pub(crate) use hashbrown::{HashMap, HashSet};
pub(crate) use log::{debug, trace, warn};
